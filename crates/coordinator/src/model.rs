//! Model registry and initial global state
//!
//! Every model variant flattens to one parameter vector laid out layer by
//! layer: the weight matrix row-major (`fan_in x fan_out`), then the hidden
//! bias, then the visible bias for variants that reconstruct their input.

use std::collections::HashMap;

use ndarray::Array1;
use rand::distributions::{Distribution, Uniform};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use runtime_core::{Error, GlobalState, MasterConfig, ModelKind, ModelLayout, Result};
use tracing::info;

/// Builds the initial parameter vector for a layout
pub type ModelFactory = fn(&ModelLayout, &mut ChaCha8Rng) -> Array1<f64>;

/// Maps model variants to the factory that initializes them
#[derive(Clone)]
pub struct ModelRegistry {
    factories: HashMap<ModelKind, ModelFactory>,
}

impl ModelRegistry {
    /// Registry with the built-in factory for every variant
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(ModelKind::Dense, dense);
        registry.register(ModelKind::Rbm, rbm);
        registry.register(ModelKind::AutoEncoder, autoencoder);
        registry
    }

    /// Replace the factory for a variant
    pub fn register(&mut self, kind: ModelKind, factory: ModelFactory) {
        self.factories.insert(kind, factory);
    }

    /// Resolve an implementation-class selector
    pub fn resolve(&self, selector: &str) -> Result<ModelKind> {
        ModelKind::from_selector(selector)
            .filter(|kind| self.factories.contains_key(kind))
            .ok_or_else(|| Error::UnknownModelClass {
                selector: selector.to_string(),
            })
    }

    /// Build the epoch-0 global state described by a configuration
    ///
    /// The same seed and layout always produce the same parameters.
    pub fn build(&self, config: &MasterConfig) -> Result<GlobalState> {
        config.validate()?;
        let kind = self.resolve(&config.implementation_class)?;
        let layout = config.layout()?;
        let factory = self
            .factories
            .get(&kind)
            .ok_or_else(|| Error::UnknownModelClass {
                selector: config.implementation_class.clone(),
            })?;

        // negative seeds keep their bit pattern
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed as u64);
        let params = factory(&layout, &mut rng);

        info!(
            kind = %kind,
            layers = ?layout.layer_sizes(),
            params = params.len(),
            seed = config.seed,
            "Initialized global state"
        );
        Ok(GlobalState::new(layout, params))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn dense(layout: &ModelLayout, rng: &mut ChaCha8Rng) -> Array1<f64> {
    layered(layout, rng, |fan_in, _| 1.0 / (fan_in as f64).sqrt())
}

fn rbm(layout: &ModelLayout, rng: &mut ChaCha8Rng) -> Array1<f64> {
    layered(layout, rng, |_, _| 0.01)
}

fn autoencoder(layout: &ModelLayout, rng: &mut ChaCha8Rng) -> Array1<f64> {
    layered(layout, rng, |fan_in, fan_out| {
        (6.0 / (fan_in + fan_out) as f64).sqrt()
    })
}

/// Uniform weights in `[-r, r)` per layer, zero biases
fn layered<F>(layout: &ModelLayout, rng: &mut ChaCha8Rng, range: F) -> Array1<f64>
where
    F: Fn(usize, usize) -> f64,
{
    let mut params = Vec::with_capacity(layout.parameter_count().unwrap_or_default());

    for (fan_in, fan_out) in layout.layer_shapes() {
        let r = range(fan_in, fan_out);
        let dist = Uniform::new(-r, r);
        params.extend((0..fan_in * fan_out).map(|_| dist.sample(&mut *rng)));

        params.extend(std::iter::repeat(0.0).take(fan_out));
        if layout.kind.has_visible_bias() {
            params.extend(std::iter::repeat(0.0).take(fan_in));
        }
    }

    Array1::from_vec(params)
}
