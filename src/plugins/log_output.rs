use std::collections::BTreeMap;

use async_trait::async_trait;
use siphon_plugin::{DataItem, FieldValue, OutputPlugin, Plugin, PluginDescriptor, PluginError, data::field_kind};
use tracing::info;

use super::PluginContext;

pub const LOG_OUTPUT_TARGET: &str = "siphon::output";

/// Output that writes every item it is sent to the log, one event per item.
/// With `fields`, only those fields are included; otherwise every field the
/// item carries.
pub struct LogOutput {
    descriptor: PluginDescriptor,
    outputs: Vec<String>,
    fields: Option<Vec<String>>,
}

impl LogOutput {
    pub const NAME: &'static str = "log";

    pub fn build(ctx: PluginContext) -> Result<Box<dyn OutputPlugin>, PluginError> {
        Ok(Box::new(Self::new(ctx)?))
    }

    pub fn new(ctx: PluginContext) -> Result<Self, PluginError> {
        ctx.params.check(&[], &["output", "fields"])?;

        let outputs = ctx.params.string_list("output")?.unwrap_or_default();
        ctx.show_param("output", &outputs);

        let fields = ctx.params.string_list("fields")?;
        for field in fields.iter().flatten() {
            field_kind(field)?;
        }
        ctx.show_param("fields", &fields);

        Ok(Self {
            descriptor: ctx.descriptor,
            outputs,
            fields,
        })
    }

    /// The JSON rendering of an item's selected fields.
    pub fn render(&self, item: &DataItem) -> Result<String, PluginError> {
        let selected: BTreeMap<&str, &FieldValue> = match &self.fields {
            Some(fields) => fields
                .iter()
                .map(|f| -> Result<(&str, &FieldValue), PluginError> {
                    Ok((f.as_str(), item.get(f)?))
                })
                .collect::<Result<_, _>>()?,
            None => item.fields().collect(),
        };
        Ok(serde_json::to_string(&selected)?)
    }
}

impl Plugin for LogOutput {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl OutputPlugin for LogOutput {
    async fn send(&self, data: Vec<DataItem>) -> Result<(), PluginError> {
        for item in &data {
            let fields = self.render(item)?;
            info!(
                target: LOG_OUTPUT_TARGET,
                hash = %self.descriptor.hash,
                flow = %self.descriptor.flow,
                uid = %item.uid(),
                source = item.plugin(),
                time = %item.time().to_rfc3339(),
                fields = %fields,
                "item"
            );
        }
        Ok(())
    }

    fn outputs(&self) -> Vec<String> {
        self.outputs.clone()
    }
}
