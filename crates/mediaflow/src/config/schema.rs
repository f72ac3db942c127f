use serde::{Deserialize, Serialize};

use crate::worker::job::JobOptions;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub version: String,
    /// File written into each job's output directory.
    #[serde(default = "default_metadata_file_name")]
    pub metadata_file_name: String,
    /// Buffer of the lossy event stream handed to async consumers.
    #[serde(default = "default_event_stream_capacity")]
    pub event_stream_capacity: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Options applied to jobs created without their own.
    #[serde(default)]
    pub defaults: JobOptions,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_metadata_file_name() -> String {
    "metadata.json".to_string()
}

fn default_event_stream_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            metadata_file_name: default_metadata_file_name(),
            event_stream_capacity: default_event_stream_capacity(),
            logging: LoggingConfig::default(),
            defaults: JobOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
