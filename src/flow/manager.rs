// src/flow/manager.rs

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use siphon_plugin::{PluginDescriptor, PluginError, PluginParams, PluginType};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Flow;
use crate::{
    config::{AppConfig, parse_duration_secs},
    plugins::{PluginContext, PluginRegistry},
};

const DEFAULT_INTERVAL_SECS: u64 = 300;
const FLOW_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Top level of a flow file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlowFile {
    pub flow: FlowConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlowConfig {
    /// Letters, digits, `.`, `_` and `-` only.
    pub name: String,
    #[serde(default)]
    pub params: FlowParams,
    pub input: StageConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process: Vec<ProcessStageConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FlowParams {
    /// Minimum time between two launches.
    #[serde(default)]
    pub interval: Interval,
    /// Launch cap. `0` runs forever.
    #[serde(default)]
    pub number: u64,
}

impl Default for FlowParams {
    fn default() -> Self {
        Self {
            interval: Interval::default(),
            number: 0,
        }
    }
}

/// Either whole seconds or a number with an `s`, `m`, `h` or `d` suffix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(untagged)]
pub enum Interval {
    Seconds(u64),
    Text(String),
}

impl Default for Interval {
    fn default() -> Self {
        Interval::Seconds(DEFAULT_INTERVAL_SECS)
    }
}

impl Interval {
    pub fn to_duration(&self) -> Result<Duration, FlowError> {
        match self {
            Interval::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            Interval::Text(text) => parse_duration_secs(text)
                .map(Duration::from_secs)
                .ok_or_else(|| FlowError::InvalidInterval(text.clone())),
        }
    }
}

/// Input or output stage.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub plugin: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProcessStageConfig {
    /// Unique within the flow; `require` refers to stages by this id.
    pub id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub plugin: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("invalid flow name `{0}`: only letters, digits, `.`, `_` and `-` are allowed")]
    InvalidName(String),

    #[error("invalid interval `{0}`")]
    InvalidInterval(String),

    #[error("process id {0} is used more than once")]
    DuplicateId(usize),

    #[error("process stage {id} requires stage {require}, which is not an earlier process stage")]
    BadRequire { id: usize, require: usize },

    #[error("unknown {plugin_type} plugin `{name}` (registered: {})", .known.join(", "))]
    UnknownPlugin {
        plugin_type: PluginType,
        name: String,
        known: Vec<String>,
    },

    #[error("{plugin_type} plugin `{name}`: {source}")]
    Plugin {
        plugin_type: PluginType,
        name: String,
        source: PluginError,
    },

    #[error("flow `{name}` ({hash}) is already loaded")]
    Duplicate { name: String, hash: String },
}

fn valid_flow_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Content hash of a flow configuration, stable across restarts.
pub fn flow_hash(config: &FlowConfig) -> Result<String, FlowError> {
    let bytes = serde_json::to_vec(config).map_err(|e| FlowError::Parse {
        file: config.name.clone(),
        reason: e.to_string(),
    })?;
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes).simple().to_string())
}

/// Turns flow files into runnable [`Flow`]s using the plugins in a registry.
#[derive(Clone)]
pub struct FlowManager {
    registry: Arc<PluginRegistry>,
    config: Arc<AppConfig>,
}

impl FlowManager {
    pub fn new(registry: Arc<PluginRegistry>, config: Arc<AppConfig>) -> Self {
        Self { registry, config }
    }

    pub fn load_flow_from_file(&self, path: &Path) -> Result<Flow, FlowError> {
        let contents = fs::read_to_string(path).map_err(|source| FlowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_flow_from_str(&contents, &path.to_string_lossy())
    }

    /// `file` is only used to label errors and plugin logs.
    pub fn load_flow_from_str(&self, contents: &str, file: &str) -> Result<Flow, FlowError> {
        let parsed: FlowFile = serde_yaml_bw::from_str(contents).map_err(|e| FlowError::Parse {
            file: file.to_string(),
            reason: e.to_string(),
        })?;
        self.build_flow(&parsed.flow, file)
    }

    pub fn build_flow(&self, config: &FlowConfig, file: &str) -> Result<Flow, FlowError> {
        if !valid_flow_name(&config.name) {
            return Err(FlowError::InvalidName(config.name.clone()));
        }
        let interval = config.params.interval.to_duration()?;
        let hash = flow_hash(config)?;

        let stage = |plugin_type, id, alias: Option<String>, name: &str, params: &Value| {
            self.context(config, file, &hash, plugin_type, id, alias, name, params)
        };

        let input_ctx = stage(PluginType::Input, 0, None, &config.input.plugin, &config.input.params)?;
        no_require(&input_ctx)?;
        let mut flow = Flow::new(
            &config.name,
            &hash,
            interval,
            config.params.number,
            self.registry.build_input(input_ctx)?,
        );

        let mut seen = HashSet::new();
        for process in &config.process {
            let ctx = stage(
                PluginType::Process,
                process.id,
                process.alias.clone(),
                &process.plugin,
                &process.params,
            )?;
            if let Some(require) = ctx.descriptor.require.iter().find(|r| !seen.contains(*r)) {
                return Err(FlowError::BadRequire {
                    id: process.id,
                    require: *require,
                });
            }
            if !seen.insert(process.id) {
                return Err(FlowError::DuplicateId(process.id));
            }
            flow = flow.with_process(self.registry.build_process(ctx)?);
        }

        if let Some(output) = &config.output {
            let ctx = stage(PluginType::Output, 0, None, &output.plugin, &output.params)?;
            no_require(&ctx)?;
            flow = flow.with_output(self.registry.build_output(ctx)?);
        }

        Ok(flow)
    }

    #[allow(clippy::too_many_arguments)]
    fn context(
        &self,
        config: &FlowConfig,
        file: &str,
        hash: &str,
        plugin_type: PluginType,
        id: usize,
        alias: Option<String>,
        name: &str,
        params: &Value,
    ) -> Result<PluginContext, FlowError> {
        let as_flow_error = |source| FlowError::Plugin {
            plugin_type,
            name: name.to_string(),
            source,
        };

        let params = PluginParams::from_value(params.clone()).map_err(as_flow_error)?;
        let include = params
            .bool("include")
            .map_err(as_flow_error)?
            .unwrap_or(self.config.plugin_include);
        let require = params
            .id_list("require")
            .map_err(as_flow_error)?
            .unwrap_or_default();

        Ok(PluginContext {
            descriptor: PluginDescriptor {
                id,
                alias,
                file: file.to_string(),
                flow: config.name.clone(),
                hash: hash.to_string(),
                name: name.to_string(),
                plugin_type,
                include,
                require,
            },
            params,
            config: Arc::clone(&self.config),
        })
    }

    /// Load every `.yaml`/`.yml` file in `dir`, in file name order. Broken
    /// flows are logged and skipped, as are flows whose name or hash was
    /// already loaded from an earlier file.
    pub fn load_all_flows_from_dir(&self, dir: &Path) -> Result<Vec<Arc<Flow>>, FlowError> {
        let io_error = |source| FlowError::Io {
            path: dir.to_path_buf(),
            source,
        };
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(io_error)?;
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            let is_flow = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| FLOW_EXTENSIONS.contains(&e.to_lowercase().as_str()));
            if path.is_file() && is_flow {
                paths.push(path);
            }
        }
        paths.sort();

        let mut names = HashSet::new();
        let mut hashes = HashSet::new();
        let mut flows = Vec::new();
        for path in paths {
            let flow = match self.load_flow_from_file(&path) {
                Ok(flow) => flow,
                Err(e) => {
                    error!(file = %path.display(), error = %e, "could not load flow");
                    continue;
                }
            };

            if names.contains(flow.name()) || hashes.contains(flow.hash()) {
                let dup = FlowError::Duplicate {
                    name: flow.name().to_string(),
                    hash: flow.hash().to_string(),
                };
                warn!(file = %path.display(), error = %dup, "skipping flow");
                continue;
            }

            info!(
                hash = %flow.hash(),
                flow = %flow.name(),
                file = %path.display(),
                interval_secs = flow.interval().as_secs(),
                number = flow.number(),
                "loaded flow"
            );
            names.insert(flow.name().to_string());
            hashes.insert(flow.hash().to_string());
            flows.push(Arc::new(flow));
        }
        Ok(flows)
    }
}

fn no_require(ctx: &PluginContext) -> Result<(), FlowError> {
    if ctx.descriptor.require.is_empty() {
        return Ok(());
    }
    Err(FlowError::Plugin {
        plugin_type: ctx.descriptor.plugin_type,
        name: ctx.descriptor.name.clone(),
        source: PluginError::invalid("require", "only process stages can require other stages"),
    })
}
