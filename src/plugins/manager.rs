//! PluginRegistry: maps plugin names to constructors, one table per stage type.
use std::{fmt::Debug, sync::Arc};

use dashmap::DashMap;
use siphon_plugin::{InputPlugin, OutputPlugin, PluginDescriptor, PluginError, PluginParams, PluginType, ProcessPlugin};
use tracing::debug;

use super::{LogOutput, RegexpMatch, StaticInput};
use crate::{config::AppConfig, flow::FlowError};

/// Everything a constructor gets to build one stage.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub descriptor: PluginDescriptor,
    pub params: PluginParams,
    pub config: Arc<AppConfig>,
}

impl PluginContext {
    /// Log a resolved parameter at debug level.
    pub fn show_param(&self, param: &str, value: &impl Debug) {
        debug!(
            hash = %self.descriptor.hash,
            flow = %self.descriptor.flow,
            file = %self.descriptor.file,
            plugin = %self.descriptor.name,
            "type" = self.descriptor.plugin_type.as_ref(),
            param,
            value = ?value,
            "set value"
        );
    }
}

pub type InputConstructor =
    Arc<dyn Fn(PluginContext) -> Result<Box<dyn InputPlugin>, PluginError> + Send + Sync>;
pub type ProcessConstructor =
    Arc<dyn Fn(PluginContext) -> Result<Box<dyn ProcessPlugin>, PluginError> + Send + Sync>;
pub type OutputConstructor =
    Arc<dyn Fn(PluginContext) -> Result<Box<dyn OutputPlugin>, PluginError> + Send + Sync>;

#[derive(Default)]
pub struct PluginRegistry {
    inputs: DashMap<String, InputConstructor>,
    processes: DashMap<String, ProcessConstructor>,
    outputs: DashMap<String, OutputConstructor>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `static`, `regexpmatch` and `log` registered.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_input(StaticInput::NAME, StaticInput::build);
        registry.register_process(RegexpMatch::NAME, RegexpMatch::build);
        registry.register_output(LogOutput::NAME, LogOutput::build);
        registry
    }

    /// Registering a name twice replaces the earlier constructor.
    pub fn register_input<F>(&self, name: &str, ctor: F)
    where
        F: Fn(PluginContext) -> Result<Box<dyn InputPlugin>, PluginError> + Send + Sync + 'static,
    {
        self.inputs.insert(name.to_string(), Arc::new(ctor));
    }

    pub fn register_process<F>(&self, name: &str, ctor: F)
    where
        F: Fn(PluginContext) -> Result<Box<dyn ProcessPlugin>, PluginError> + Send + Sync + 'static,
    {
        self.processes.insert(name.to_string(), Arc::new(ctor));
    }

    pub fn register_output<F>(&self, name: &str, ctor: F)
    where
        F: Fn(PluginContext) -> Result<Box<dyn OutputPlugin>, PluginError> + Send + Sync + 'static,
    {
        self.outputs.insert(name.to_string(), Arc::new(ctor));
    }

    /// Registered names of one stage type, sorted.
    pub fn names(&self, plugin_type: PluginType) -> Vec<String> {
        let mut names: Vec<String> = match plugin_type {
            PluginType::Input => self.inputs.iter().map(|e| e.key().clone()).collect(),
            PluginType::Process => self.processes.iter().map(|e| e.key().clone()).collect(),
            PluginType::Output => self.outputs.iter().map(|e| e.key().clone()).collect(),
        };
        names.sort();
        names
    }

    pub fn build_input(&self, ctx: PluginContext) -> Result<Box<dyn InputPlugin>, FlowError> {
        let name = ctx.descriptor.name.clone();
        let ctor = self
            .inputs
            .get(&name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| self.unknown(PluginType::Input, &name))?;
        ctor(ctx).map_err(|source| failed(PluginType::Input, name, source))
    }

    pub fn build_process(&self, ctx: PluginContext) -> Result<Box<dyn ProcessPlugin>, FlowError> {
        let name = ctx.descriptor.name.clone();
        let ctor = self
            .processes
            .get(&name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| self.unknown(PluginType::Process, &name))?;
        ctor(ctx).map_err(|source| failed(PluginType::Process, name, source))
    }

    pub fn build_output(&self, ctx: PluginContext) -> Result<Box<dyn OutputPlugin>, FlowError> {
        let name = ctx.descriptor.name.clone();
        let ctor = self
            .outputs
            .get(&name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| self.unknown(PluginType::Output, &name))?;
        ctor(ctx).map_err(|source| failed(PluginType::Output, name, source))
    }

    fn unknown(&self, plugin_type: PluginType, name: &str) -> FlowError {
        FlowError::UnknownPlugin {
            plugin_type,
            name: name.to_string(),
            known: self.names(plugin_type),
        }
    }
}

fn failed(plugin_type: PluginType, name: String, source: PluginError) -> FlowError {
    FlowError::Plugin {
        plugin_type,
        name,
        source,
    }
}
