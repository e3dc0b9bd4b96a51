use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

use crate::data::{DataError, DataItem};

/// What log levels are supported?
/// Higher‐value variants are more severe.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    /// The `EnvFilter` directive for this level. `critical` has no tracing
    /// counterpart and maps onto `error`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginType {
    Input,
    Process,
    Output,
}

/// Identity and gating metadata shared by every stage. Built once when the
/// flow is loaded and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub id: usize,
    pub alias: Option<String>,
    pub file: String,
    pub flow: String,
    pub hash: String,
    pub name: String,
    pub plugin_type: PluginType,
    pub include: bool,
    pub require: Vec<usize>,
}

/// The identity half of the contract. Stages only have to hand out their
/// descriptor.
pub trait Plugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    fn id(&self) -> usize {
        self.descriptor().id
    }

    fn alias(&self) -> Option<&str> {
        self.descriptor().alias.as_deref()
    }

    fn file(&self) -> &str {
        &self.descriptor().file
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn plugin_type(&self) -> PluginType {
        self.descriptor().plugin_type
    }

    fn include(&self) -> bool {
        self.descriptor().include
    }

    fn require(&self) -> &[usize] {
        &self.descriptor().require
    }
}

#[async_trait]
pub trait InputPlugin: Plugin {
    /// Pull the next batch from the source. An empty batch is not an error.
    async fn receive(&self) -> Result<Vec<DataItem>, PluginError>;

    /// Source parameters, reported as the `input_values` metrics label.
    fn inputs(&self) -> Vec<String>;
}

#[async_trait]
pub trait ProcessPlugin: Plugin {
    /// Transform and filter a batch. Returns the retained items as a new
    /// sequence; an empty batch yields an empty result.
    async fn process(&self, data: Vec<DataItem>) -> Result<Vec<DataItem>, PluginError>;
}

#[async_trait]
pub trait OutputPlugin: Plugin {
    async fn send(&self, data: Vec<DataItem>) -> Result<(), PluginError>;

    /// Destination parameters, reported as the `output_values` metrics label.
    fn outputs(&self) -> Vec<String>;
}

/// Errors that a stage implementation can return, both while being built
/// and while running.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PluginError {
    #[error("missing required parameter: {0}")]
    MissingParam(String),

    #[error("unknown parameter: {0}")]
    UnknownParam(String),

    #[error("invalid value for parameter `{param}`: {reason}")]
    InvalidParam { param: String, reason: String },

    #[error("parameters have different sizes: {0}")]
    SizeMismatch(String),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("plugin error: {0}")]
    Other(String),
}

impl PluginError {
    pub fn invalid(param: impl Into<String>, reason: impl ToString) -> Self {
        PluginError::InvalidParam {
            param: param.into(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that can only come from a bad configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PluginError::MissingParam(_)
                | PluginError::UnknownParam(_)
                | PluginError::InvalidParam { .. }
                | PluginError::SizeMismatch(_)
        )
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Other(err.to_string())
    }
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> PluginError {
        PluginError::Other(err.to_string())
    }
}
