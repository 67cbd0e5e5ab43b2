//! Master configuration types
//!
//! The configuration is read once at setup and never mutated afterwards. It
//! can be built from a flat string key/value set (the format the data
//! pipeline hands to the master) or from a JSON document.

use crate::{Error, ModelKind, ModelLayout, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Configuration keys understood by [`MasterConfig::from_properties`]
pub mod keys {
    pub const SEED: &str = "seed";
    pub const NUM_INPUTS: &str = "numInputs";
    pub const NUM_OUTPUTS: &str = "numOutputs";
    pub const HIDDEN_LAYER_SIZES: &str = "hiddenLayerSizes";
    pub const IMPLEMENTATION_CLASS: &str = "implementationClass";
    pub const NUM_PASSES: &str = "numPasses";
    pub const PARTITION_SIZE: &str = "partitionSize";
}

/// Main master configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfig {
    /// Seed for the parameter initialization generator, any 64-bit value
    pub seed: i64,

    /// Input dimensionality of the model
    pub num_inputs: usize,

    /// Output dimensionality of the model
    pub num_outputs: usize,

    /// Hidden layer sizes, in order
    #[serde(with = "layer_sizes")]
    pub hidden_layer_sizes: Vec<usize>,

    /// Model variant selector
    pub implementation_class: String,

    /// Number of reductions after which training is done
    pub num_passes: u64,

    /// Number of worker results buffered before a reduction
    pub partition_size: usize,

    /// Mailbox and broadcast settings
    #[serde(default)]
    pub channels: ChannelConfig,
}

/// Mailbox and broadcast channel capacities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Capacity of the coordinator mailbox
    pub mailbox_capacity: usize,

    /// Capacity of each broadcast topic
    pub broadcast_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            broadcast_capacity: 256,
        }
    }
}

impl MasterConfig {
    /// Build a configuration from a flat key/value set
    ///
    /// Every key in [`keys`] is required; `hiddenLayerSizes` is a
    /// comma-separated list of integers and may be empty.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let config = Self {
            seed: parse_key(props, keys::SEED)?,
            num_inputs: parse_key(props, keys::NUM_INPUTS)?,
            num_outputs: parse_key(props, keys::NUM_OUTPUTS)?,
            hidden_layer_sizes: parse_layer_sizes(required(props, keys::HIDDEN_LAYER_SIZES)?)?,
            implementation_class: required(props, keys::IMPLEMENTATION_CLASS)?.trim().to_string(),
            num_passes: parse_key(props, keys::NUM_PASSES)?,
            partition_size: parse_key(props, keys::PARTITION_SIZE)?,
            channels: ChannelConfig::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| Error::InvalidConfig {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Model layout described by this configuration
    pub fn layout(&self) -> Result<ModelLayout> {
        let kind = ModelKind::from_selector(&self.implementation_class).ok_or_else(|| {
            Error::UnknownModelClass {
                selector: self.implementation_class.clone(),
            }
        })?;

        Ok(ModelLayout {
            kind,
            num_inputs: self.num_inputs,
            num_outputs: self.num_outputs,
            hidden_layer_sizes: self.hidden_layer_sizes.clone(),
        })
    }

    /// Check value ranges that the type system does not cover
    pub fn validate(&self) -> Result<()> {
        if self.partition_size == 0 {
            return Err(invalid("partitionSize must be at least 1"));
        }
        if self.num_passes == 0 {
            return Err(invalid("numPasses must be at least 1"));
        }
        if self.num_inputs == 0 || self.num_outputs == 0 {
            return Err(invalid("numInputs and numOutputs must be non-zero"));
        }
        if self.hidden_layer_sizes.contains(&0) {
            return Err(invalid("hiddenLayerSizes must not contain zero"));
        }
        if ModelKind::from_selector(&self.implementation_class).is_none() {
            return Err(Error::UnknownModelClass {
                selector: self.implementation_class.clone(),
            });
        }
        if self.layout()?.parameter_count().is_none() {
            return Err(invalid("layer sizes overflow the parameter count"));
        }
        if self.channels.mailbox_capacity == 0 || self.channels.broadcast_capacity == 0 {
            return Err(invalid("channel capacities must be non-zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidConfig {
        message: message.to_string(),
    }
}

fn required<'a>(props: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::MissingConfigKey {
            key: key.to_string(),
        })
}

fn parse_key<T: FromStr>(props: &HashMap<String, String>, key: &str) -> Result<T> {
    let raw = required(props, key)?;
    raw.trim().parse().map_err(|_| Error::InvalidConfig {
        message: format!("{} is not a valid number: {:?}", key, raw),
    })
}

/// Parse a comma-separated list of layer sizes
pub fn parse_layer_sizes(raw: &str) -> Result<Vec<usize>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| Error::InvalidConfig {
                message: format!("{} contains a non-numeric size: {:?}", keys::HIDDEN_LAYER_SIZES, s),
            })
        })
        .collect()
}

/// Layer sizes accept either a JSON array or the comma-separated form
mod layer_sizes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        List(Vec<usize>),
        Text(String),
    }

    pub fn serialize<S>(sizes: &[usize], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(sizes)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<usize>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::List(sizes) => Ok(sizes),
            Repr::Text(text) => super::parse_layer_sizes(&text).map_err(de::Error::custom),
        }
    }
}
