//! Core type definitions for the parameter-server master

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Unique identifier types
pub type WorkerId = String;
pub type Topic = String;

/// Completed-reduction counter
pub type Epoch = u64;

/// Topic every worker subscribes to
pub const BROADCAST_TOPIC: &str = "broadcast";

/// Closed set of model variants the master can initialize
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Feed-forward dense layers
    Dense,

    /// Stacked restricted Boltzmann machines
    Rbm,

    /// Stacked denoising auto-encoders
    AutoEncoder,
}

impl ModelKind {
    /// Canonical selector string
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Dense => "dense",
            ModelKind::Rbm => "rbm",
            ModelKind::AutoEncoder => "autoencoder",
        }
    }

    /// Resolve an implementation-class selector
    ///
    /// Matching is case-insensitive and only looks at the last path segment,
    /// so `org.example.rbm.RBM` resolves like `rbm`.
    pub fn from_selector(selector: &str) -> Option<Self> {
        let name = selector
            .rsplit(|c| c == '.' || c == ':' || c == '/')
            .next()
            .unwrap_or(selector)
            .trim()
            .to_ascii_lowercase();

        match name.as_str() {
            "dense" | "feedforward" | "mlp" => Some(ModelKind::Dense),
            "rbm" => Some(ModelKind::Rbm),
            "autoencoder" | "denoisingautoencoder" | "da" => Some(ModelKind::AutoEncoder),
            _ => None,
        }
    }

    /// Whether each layer also carries a visible (reconstruction) bias
    pub fn has_visible_bias(&self) -> bool {
        matches!(self, ModelKind::Rbm | ModelKind::AutoEncoder)
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the model a parameter blob belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelLayout {
    /// Model variant
    pub kind: ModelKind,

    /// Input dimensionality
    pub num_inputs: usize,

    /// Output dimensionality
    pub num_outputs: usize,

    /// Hidden layer sizes, in order
    pub hidden_layer_sizes: Vec<usize>,
}

impl ModelLayout {
    /// All layer widths from input to output
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.hidden_layer_sizes.len() + 2);
        sizes.push(self.num_inputs);
        sizes.extend_from_slice(&self.hidden_layer_sizes);
        sizes.push(self.num_outputs);
        sizes
    }

    /// (fan_in, fan_out) pairs, one per layer
    pub fn layer_shapes(&self) -> Vec<(usize, usize)> {
        self.layer_sizes()
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .collect()
    }

    /// Number of scalars in a flattened parameter blob for this layout
    ///
    /// `None` when the count does not fit in `usize`.
    pub fn parameter_count(&self) -> Option<usize> {
        self.layer_shapes()
            .into_iter()
            .try_fold(0usize, |total, (fan_in, fan_out)| {
                let visible = if self.kind.has_visible_bias() { fan_in } else { 0 };
                fan_in
                    .checked_mul(fan_out)?
                    .checked_add(fan_out)?
                    .checked_add(visible)?
                    .checked_add(total)
            })
    }
}

/// Consensus model snapshot owned by the master
///
/// A new snapshot replaces the old one on every reduction; snapshots are
/// never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalState {
    epoch: Epoch,
    layout: ModelLayout,
    params: Array1<f64>,
}

impl GlobalState {
    /// Create the epoch-0 state for a layout
    pub fn new(layout: ModelLayout, params: Array1<f64>) -> Self {
        Self {
            epoch: 0,
            layout,
            params,
        }
    }

    /// Build the snapshot that follows this one
    pub fn advance(&self, params: Array1<f64>, epoch: Epoch) -> Self {
        Self {
            epoch,
            layout: self.layout.clone(),
            params,
        }
    }

    /// Epoch this snapshot was produced at
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Model layout
    pub fn layout(&self) -> &ModelLayout {
        &self.layout
    }

    /// Flattened parameters
    pub fn params(&self) -> &Array1<f64> {
        &self.params
    }

    /// Number of parameters
    pub fn dim(&self) -> usize {
        self.params.len()
    }
}

/// One worker's locally computed update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    worker_id: WorkerId,
    payload: Array1<f64>,
}

impl WorkerResult {
    /// Wrap a worker's update
    pub fn new(worker_id: impl Into<WorkerId>, payload: Array1<f64>) -> Self {
        Self {
            worker_id: worker_id.into(),
            payload,
        }
    }

    /// Worker that produced the update
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Numeric payload
    pub fn payload(&self) -> &Array1<f64> {
        &self.payload
    }
}

/// A window of tokens centred on a focus word
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// Tokens in the window
    pub tokens: Vec<String>,

    /// Index of the focus token
    pub focus: usize,
}

impl Window {
    /// Create a window, centring the focus on the middle token
    pub fn centred(tokens: Vec<String>) -> Self {
        let focus = tokens.len() / 2;
        Self { tokens, focus }
    }

    /// The focus token, if the window is non-empty
    pub fn focus_token(&self) -> Option<&str> {
        self.tokens.get(self.focus).map(String::as_str)
    }
}

/// Smallest unit of distributable training data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkUnit {
    /// A window of text tokens
    Window(Window),

    /// One aligned (input row, label row) pair
    Example {
        input: Array1<f64>,
        label: Array1<f64>,
    },
}

/// Raw batch handed to the master by the data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawBatch {
    /// Already at unit-of-work granularity
    Units(Vec<WorkUnit>),

    /// Input and label matrices to be split row-wise
    Matrices {
        inputs: Array2<f64>,
        labels: Array2<f64>,
    },
}

impl RawBatch {
    /// Number of rows or units in the batch
    pub fn len(&self) -> usize {
        match self {
            RawBatch::Units(units) => units.len(),
            RawBatch::Matrices { inputs, .. } => inputs.nrows(),
        }
    }

    /// Whether the batch carries no work
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
