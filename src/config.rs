//! Service configuration.
//!
//! Writer parameters mirror the control-plane surface: every public field
//! of [`WriterConfig`] is reachable through the typed parameter map used by
//! the HTTP API, and nowhere else; the hot path reads the struct directly.

use crate::backend::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Substitution point in the output path template that receives the 1-based
/// chunk number when chunking is enabled.
pub const CHUNK_NUMBER_PLACEHOLDER: &str = "{chunk_number}";

/// Main configuration for the frame storage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Writer engine configuration
    #[serde(default)]
    pub writer: WriterConfig,
    /// Ingest listener configuration
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Control-plane API configuration
    #[serde(default)]
    pub control: ControlConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Arm the writer at boot instead of waiting for a control-plane start
    #[serde(default)]
    pub auto_start: bool,
}

/// Writer engine configuration.
///
/// `dataset_name` and `output_path` are required before `start`; they may
/// arrive from the config sources or through the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Name of the primary dataset inside each container
    #[serde(default)]
    pub dataset_name: String,
    /// Output path template; must contain `{chunk_number}` when chunking
    /// is enabled
    #[serde(default)]
    pub output_path: String,
    /// Frames per container; `None` or 0 writes one unbounded container
    #[serde(default)]
    pub frames_per_container: Option<u64>,
    /// Compression filter id recorded in container metadata
    #[serde(default)]
    pub compression: Option<u32>,
    /// Codec-specific compression options, recorded verbatim
    #[serde(default)]
    pub compression_opts: Option<Vec<u64>>,
    /// Attributes written at group scope when a container closes
    #[serde(default)]
    pub group_attributes: BTreeMap<String, Value>,
    /// Attributes written at dataset scope when a container closes; keys of
    /// the form `path:attr` target the dataset at `path`, bare keys target
    /// the primary dataset
    #[serde(default)]
    pub dataset_attributes: BTreeMap<String, Value>,
    /// Auxiliary datasets embedded verbatim when a container closes
    #[serde(default)]
    pub extra_datasets: BTreeMap<String, Value>,
}

/// Ingest listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Listen address for the frame stream
    #[serde(default = "default_ingest_host")]
    pub host: String,
    /// Listen port for the frame stream
    #[serde(default = "default_ingest_port")]
    pub port: u16,
    /// Bounded frame queue between transport and writer
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Reject frames with payloads larger than this
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

/// Control-plane API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// API listen address
    #[serde(default = "default_control_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_control_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

// Default value functions
fn default_service_name() -> String {
    "framestore".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_ingest_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ingest_port() -> u16 {
    9000
}

fn default_queue_size() -> usize {
    128
}

fn default_max_payload_bytes() -> usize {
    256 * 1024 * 1024 // one encoded frame should never exceed 256MB
}

fn default_control_host() -> String {
    "0.0.0.0".to_string()
}

fn default_control_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/framestore").required(false))
            .add_source(config::File::with_name("/etc/framestore/config").required(false))
            // FRAMESTORE__WRITER__DATASET_NAME -> writer.dataset_name
            .add_source(
                config::Environment::with_prefix("FRAMESTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            auto_start: false,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_ingest_host(),
            port: default_ingest_port(),
            queue_size: default_queue_size(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            host: default_control_host(),
            port: default_control_port(),
            cors_enabled: default_true(),
        }
    }
}

/// Errors raised by the control-plane parameter map.
#[derive(Debug, Error)]
pub enum ParameterError {
    /// No parameter with this name exists.
    #[error("unknown parameter '{0}'")]
    Unknown(String),

    /// The value does not match the parameter's type.
    #[error("invalid value for '{name}': {reason}")]
    Invalid {
        /// Parameter name.
        name: String,
        /// What was wrong with the value.
        reason: String,
    },
}

impl WriterConfig {
    /// Chunk capacity with the "0 means unbounded" convention normalized.
    pub fn chunk_capacity(&self) -> Option<u64> {
        self.frames_per_container.filter(|&c| c > 0)
    }

    /// Compression metadata for container creation, if configured.
    pub fn compression(&self) -> Option<Compression> {
        self.compression.map(|filter_id| Compression {
            filter_id,
            options: self.compression_opts.clone().unwrap_or_default(),
        })
    }

    /// Check that all parameters needed for a run are set.
    pub fn validate(&self) -> Result<(), String> {
        let mut error_message = String::new();

        if self.dataset_name.is_empty() {
            error_message.push_str("Parameter 'dataset_name' not set.\n");
        }

        if self.output_path.is_empty() {
            error_message.push_str("Parameter 'output_path' not set.\n");
        } else if self.chunk_capacity().is_some()
            && !self.output_path.contains(CHUNK_NUMBER_PLACEHOLDER)
        {
            error_message.push_str(
                "Parameter 'output_path' must contain '{chunk_number}' \
                 when 'frames_per_container' is set.\n",
            );
        }

        if error_message.is_empty() {
            Ok(())
        } else {
            Err(error_message)
        }
    }

    /// All control-plane parameters as a flat name to value mapping.
    pub fn parameters(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            // WriterConfig always serializes to an object.
            _ => BTreeMap::new(),
        }
    }

    /// Set one parameter by name, with type checking.
    ///
    /// Changes apply from the next container open; the currently open
    /// container is unaffected.
    pub fn set_parameter(&mut self, name: &str, value: Value) -> Result<(), ParameterError> {
        match name {
            "dataset_name" => self.dataset_name = as_string(name, value)?,
            "output_path" => self.output_path = as_string(name, value)?,
            "frames_per_container" => self.frames_per_container = as_opt_u64(name, value)?,
            "compression" => {
                self.compression = as_opt_u64(name, value)?
                    .map(|id| {
                        u32::try_from(id).map_err(|_| ParameterError::Invalid {
                            name: name.to_string(),
                            reason: "filter id out of range".to_string(),
                        })
                    })
                    .transpose()?
            }
            "compression_opts" => self.compression_opts = as_opt_u64_list(name, value)?,
            "group_attributes" => self.group_attributes = as_object(name, value)?,
            "dataset_attributes" => self.dataset_attributes = as_object(name, value)?,
            "extra_datasets" => self.extra_datasets = as_object(name, value)?,
            _ => return Err(ParameterError::Unknown(name.to_string())),
        }
        Ok(())
    }
}

fn as_string(name: &str, value: Value) -> Result<String, ParameterError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(invalid(name, "expected a string", &other)),
    }
}

fn as_opt_u64(name: &str, value: Value) -> Result<Option<u64>, ParameterError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| invalid(name, "expected a non-negative integer", &Value::Number(n))),
        other => Err(invalid(name, "expected a non-negative integer or null", &other)),
    }
}

fn as_opt_u64_list(name: &str, value: Value) -> Result<Option<Vec<u64>>, ParameterError> {
    match value {
        Value::Null => Ok(None),
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                item.as_u64()
                    .ok_or_else(|| invalid(name, "expected non-negative integers", &item))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        other => Err(invalid(name, "expected an array of integers or null", &other)),
    }
}

fn as_object(name: &str, value: Value) -> Result<BTreeMap<String, Value>, ParameterError> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(invalid(name, "expected an object", &other)),
    }
}

fn invalid(name: &str, reason: &str, value: &Value) -> ParameterError {
    ParameterError::Invalid {
        name: name.to_string(),
        reason: format!("{reason}, got {value}"),
    }
}
