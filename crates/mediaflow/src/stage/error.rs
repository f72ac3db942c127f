use std::any::Any;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::worker::job::JobErrorInfo;

/// Machine-readable failure codes.
pub mod codes {
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const DOWNLOAD_EXEC_ERROR: &str = "DOWNLOAD_EXEC_ERROR";
    pub const FFMPEG_FAILED: &str = "FFMPEG_FAILED";
    pub const WHISPER_PROCESS_ERROR: &str = "WHISPER_PROCESS_ERROR";
    pub const AUDIO_MISSING: &str = "AUDIO_MISSING";
    pub const METADATA_WRITE_FAILED: &str = "METADATA_WRITE_FAILED";
}

/// Tagged failure raised by a stage adapter.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct StageError {
    pub code: String,
    pub message: String,
    pub details: Option<Map<String, Value>>,
}

impl StageError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(codes::UNKNOWN_ERROR, message)
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details
            .get_or_insert_with(Map::new)
            .insert(key.into(), value.into());
        self
    }

    /// Replaces a missing code with `UNKNOWN_ERROR`; any other code is kept.
    pub fn classify(mut self) -> Self {
        if self.code.trim().is_empty() {
            self.code = codes::UNKNOWN_ERROR.to_string();
        }
        if self.message.trim().is_empty() {
            self.message = "Stage failed without a message".to_string();
        }
        self
    }

    /// Wraps the payload of a panic caught while an adapter was running.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::unknown(format!("Stage adapter panicked: {}", message)).with_detail("panic", true)
    }

    pub fn to_error_info(&self) -> JobErrorInfo {
        JobErrorInfo {
            code: self.code.clone(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::unknown(err.to_string()).with_detail("ioKind", format!("{:?}", err.kind()))
    }
}

impl From<StageError> for JobErrorInfo {
    fn from(err: StageError) -> Self {
        JobErrorInfo {
            code: err.code,
            message: err.message,
            details: err.details,
        }
    }
}
