use async_trait::async_trait;
use serde_json::Value;
use siphon_plugin::{
    DataItem, FieldValue, InputPlugin, Plugin, PluginDescriptor, PluginError, params::string_list,
};

use super::PluginContext;

/// Input that hands out the same items, declared in the flow file, on every
/// run. Each run gets fresh items with new uids.
///
/// ```yaml
/// input:
///   plugin: static
///   params:
///     input: [fixtures]
///     items:
///       - { rss.title: "hello", rss.categories: [a, b] }
/// ```
pub struct StaticInput {
    descriptor: PluginDescriptor,
    inputs: Vec<String>,
    items: Vec<Vec<(String, FieldValue)>>,
}

impl StaticInput {
    pub const NAME: &'static str = "static";

    pub fn build(ctx: PluginContext) -> Result<Box<dyn InputPlugin>, PluginError> {
        Ok(Box::new(Self::new(ctx)?))
    }

    pub fn new(ctx: PluginContext) -> Result<Self, PluginError> {
        ctx.params.check(&["items"], &["input"])?;

        let inputs = ctx.params.string_list("input")?.unwrap_or_default();
        ctx.show_param("input", &inputs);

        let raw = match ctx.params.get("items") {
            Some(Value::Array(raw)) => raw,
            _ => return Err(PluginError::invalid("items", "expected a list of items")),
        };

        let mut items = Vec::with_capacity(raw.len());
        for entry in raw {
            let Value::Object(map) = entry else {
                return Err(PluginError::invalid("items", format!("`{entry}` is not a map of fields")));
            };

            // Writing into a throwaway item validates names and kinds.
            let mut probe = DataItem::new(&ctx.descriptor.flow, &ctx.descriptor.name);
            let mut fields = Vec::with_capacity(map.len());
            for (name, value) in map {
                let value = match value {
                    Value::String(s) => FieldValue::Scalar(s.clone()),
                    Value::Array(_) => FieldValue::Sequence(string_list("items", value)?),
                    other => {
                        return Err(PluginError::invalid(
                            "items",
                            format!("`{name}` must be a string or a list of strings, got {other}"),
                        ));
                    }
                };
                probe.set(name, value.clone())?;
                fields.push((name.clone(), value));
            }
            items.push(fields);
        }
        ctx.show_param("items", &items.len());

        Ok(Self {
            descriptor: ctx.descriptor,
            inputs,
            items,
        })
    }
}

impl Plugin for StaticInput {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl InputPlugin for StaticInput {
    async fn receive(&self) -> Result<Vec<DataItem>, PluginError> {
        self.items
            .iter()
            .map(|fields| {
                let mut item = DataItem::new(&self.descriptor.flow, self.name());
                for (name, value) in fields {
                    item.set(name, value.clone())?;
                }
                Ok(item)
            })
            .collect()
    }

    fn inputs(&self) -> Vec<String> {
        self.inputs.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manager::tests::context;
    use serde_json::json;
    use siphon_plugin::{DataError, PluginType};

    fn build(params: Value) -> Result<StaticInput, PluginError> {
        StaticInput::new(context(PluginType::Input, StaticInput::NAME, params))
    }

    #[tokio::test]
    async fn every_run_gets_fresh_items() {
        let input = build(json!({
            "input": ["fixtures"],
            "items": [
                { "rss.title": "hello", "rss.categories": ["a", "b"] },
                { "DATA.TEXT3": "upper" },
            ],
        }))
        .unwrap();
        assert_eq!(input.inputs(), vec!["fixtures"]);

        let first = input.receive().await.unwrap();
        let second = input.receive().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_ne!(first[0].uid(), second[0].uid());
        assert_eq!(first[0].get("rss.title").unwrap().as_scalar(), Some("hello"));
        assert_eq!(first[0].get("rss.categories").unwrap().as_sequence().map(|s| s.len()), Some(2));
        assert_eq!(first[1].get("data.text3").unwrap().as_scalar(), Some("upper"));
        assert_eq!(first[1].flow(), "test");
        assert_eq!(first[1].plugin(), "static");
    }

    #[tokio::test]
    async fn empty_items_receive_nothing() {
        let input = build(json!({ "items": [] })).unwrap();
        assert!(input.receive().await.unwrap().is_empty());
        assert!(input.inputs().is_empty());
    }

    #[test]
    fn invalid_items_fail_construction() {
        assert_eq!(build(json!({})).err(), Some(PluginError::MissingParam("items".into())));
        assert!(matches!(build(json!({ "items": "x" })), Err(PluginError::InvalidParam { .. })));
        assert!(matches!(build(json!({ "items": [1] })), Err(PluginError::InvalidParam { .. })));
        assert!(matches!(
            build(json!({ "items": [{ "rss.nope": "x" }] })),
            Err(PluginError::Data(DataError::UnknownField(_)))
        ));
        assert!(matches!(
            build(json!({ "items": [{ "rss.title": ["x"] }] })),
            Err(PluginError::Data(DataError::KindMismatch { .. }))
        ));
        assert!(matches!(build(json!({ "items": [{ "rss.title": 5 }] })), Err(PluginError::InvalidParam { .. })));
    }
}
