//! `regexpmatch`: keep items whose fields match regular expressions.
//!
//! Each entry of `input` is paired with the entry at the same position in
//! `regexp` (and in `output`, when given). A scalar field matches when any
//! pattern of its group matches it; the value is then copied to the output
//! field. A sequence field matches when any element does; only the matching
//! elements are appended to the output field.
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use siphon_plugin::{
    DataItem, FieldValue, Plugin, PluginDescriptor, PluginError, ProcessPlugin, data::field_kind,
    params::string_list,
};

use super::PluginContext;
use crate::config::AppConfig;

pub struct RegexpMatch {
    descriptor: PluginDescriptor,
    input: Vec<String>,
    output: Option<Vec<String>>,
    groups: Vec<Vec<Regex>>,
    match_all: bool,
}

impl RegexpMatch {
    pub const NAME: &'static str = "regexpmatch";

    pub fn build(ctx: PluginContext) -> Result<Box<dyn ProcessPlugin>, PluginError> {
        Ok(Box::new(Self::new(ctx)?))
    }

    pub fn new(ctx: PluginContext) -> Result<Self, PluginError> {
        ctx.params
            .check(&["input", "regexp"], &["output", "match_all", "match_case"])?;

        let input = ctx.params.string_list("input")?.unwrap_or_default();
        if input.is_empty() {
            return Err(PluginError::invalid("input", "at least one field is required"));
        }
        ctx.show_param("input", &input);

        let output = ctx.params.string_list("output")?;
        ctx.show_param("output", &output);

        let match_all = ctx.params.bool("match_all")?.unwrap_or(false);
        ctx.show_param("match_all", &match_all);

        let match_case = ctx.params.bool("match_case")?.unwrap_or(true);
        ctx.show_param("match_case", &match_case);

        let patterns = pattern_groups(ctx.params.get("regexp"), &ctx.config)?;
        ctx.show_param("regexp", &patterns);

        if patterns.len() != input.len() {
            return Err(PluginError::SizeMismatch(format!(
                "input has {} entries, regexp has {}",
                input.len(),
                patterns.len()
            )));
        }
        if let Some(output) = &output {
            if output.len() != input.len() {
                return Err(PluginError::SizeMismatch(format!(
                    "input has {} entries, output has {}",
                    input.len(),
                    output.len()
                )));
            }
        }

        for (i, field) in input.iter().enumerate() {
            let kind = field_kind(field)?;
            if let Some(output) = &output {
                let out_kind = field_kind(&output[i])?;
                if out_kind != kind {
                    return Err(PluginError::invalid(
                        "output",
                        format!("`{}` is a {out_kind} field but `{field}` is a {kind}", output[i]),
                    ));
                }
            }
        }

        let groups = patterns
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(|p| {
                        RegexBuilder::new(p)
                            .case_insensitive(!match_case)
                            .build()
                            .map_err(|e| PluginError::invalid("regexp", e))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            descriptor: ctx.descriptor,
            input,
            output,
            groups,
            match_all,
        })
    }

    fn matches(&self, index: usize, text: &str) -> bool {
        self.groups[index].iter().any(|re| re.is_match(text))
    }

    /// Evaluate one item, writing output fields as a side effect. Returns
    /// whether the item is retained.
    fn evaluate(&self, item: &mut DataItem) -> Result<bool, PluginError> {
        let mut matched = vec![false; self.input.len()];

        for (i, field) in self.input.iter().enumerate() {
            let target = self.output.as_ref().map(|o| o[i].as_str());
            match item.get(field)?.clone() {
                FieldValue::Scalar(value) => {
                    if self.matches(i, &value) {
                        matched[i] = true;
                        if let Some(target) = target {
                            item.set(target, value)?;
                        }
                    }
                }
                FieldValue::Sequence(values) => {
                    for value in values {
                        if self.matches(i, &value) {
                            matched[i] = true;
                            if let Some(target) = target {
                                item.push(target, value)?;
                            }
                        }
                    }
                }
            }
        }

        Ok(if self.match_all {
            matched.iter().all(|m| *m)
        } else {
            matched.iter().any(|m| *m)
        })
    }
}

/// One pattern group per `regexp` entry. An entry is an inline list of
/// patterns, the name of a group from the app config, or a single pattern.
fn pattern_groups(value: Option<&Value>, config: &AppConfig) -> Result<Vec<Vec<String>>, PluginError> {
    let entries = match value {
        None => return Err(PluginError::MissingParam("regexp".into())),
        Some(Value::Array(entries)) => entries.clone(),
        Some(single @ Value::String(_)) => vec![single.clone()],
        Some(other) => {
            return Err(PluginError::invalid("regexp", format!("expected a list, got {other}")));
        }
    };

    entries
        .iter()
        .map(|entry| {
            let group = match entry {
                Value::String(s) => match config.regexp_group(s) {
                    Some(group) => group.to_vec(),
                    None => vec![s.clone()],
                },
                other => string_list("regexp", other)?,
            };
            if group.is_empty() {
                return Err(PluginError::invalid("regexp", "empty pattern group"));
            }
            Ok(group)
        })
        .collect()
}

impl Plugin for RegexpMatch {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl ProcessPlugin for RegexpMatch {
    async fn process(&self, data: Vec<DataItem>) -> Result<Vec<DataItem>, PluginError> {
        let mut retained = Vec::new();
        for mut item in data {
            if self.evaluate(&mut item)? {
                retained.push(item);
            }
        }
        Ok(retained)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manager::tests::{context, context_with};
    use serde_json::json;
    use siphon_plugin::{DataError, PluginType};

    fn build(params: Value) -> Result<RegexpMatch, PluginError> {
        RegexpMatch::new(context(PluginType::Process, RegexpMatch::NAME, params))
    }

    fn item(fields: &[(&str, FieldValue)]) -> DataItem {
        let mut item = DataItem::new("test", "static");
        for (name, value) in fields {
            item.set(name, value.clone()).unwrap();
        }
        item
    }

    fn two_scalars() -> DataItem {
        item(&[("rss.title", "hello".into()), ("rss.description", "zzz".into())])
    }

    #[tokio::test]
    async fn any_match_retains() {
        let stage = build(json!({
            "input": ["rss.title", "rss.description"],
            "regexp": [["hel+o"], ["^a"]],
        }))
        .unwrap();
        assert_eq!(stage.process(vec![two_scalars()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn match_all_requires_every_field() {
        let stage = build(json!({
            "input": ["rss.title", "rss.description"],
            "regexp": [["hel+o"], ["^a"]],
            "match_all": true,
        }))
        .unwrap();
        assert!(stage.process(vec![two_scalars()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sequence_matches_append_only_matching_elements() {
        let stage = build(json!({
            "input": ["rss.categories"],
            "output": ["data.array0"],
            "regexp": ["^a"],
        }))
        .unwrap();
        let data = vec![item(&[("rss.categories", vec!["apple", "banana"].into())])];

        let out = stage.process(data).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].get("data.array0").unwrap().as_sequence(),
            Some(&["apple".to_string()][..])
        );
    }

    #[tokio::test]
    async fn scalar_match_is_copied_to_output() {
        let stage = build(json!({
            "input": ["rss.title"],
            "output": ["data.text0"],
            "regexp": ["hello"],
        }))
        .unwrap();
        let original = two_scalars();
        let uid = original.uid();
        let out = stage.process(vec![original]).await.unwrap();
        assert_eq!(out[0].uid(), uid);
        assert_eq!(out[0].get("data.text0").unwrap().as_scalar(), Some("hello"));
    }

    #[tokio::test]
    async fn match_case_false_ignores_case() {
        let sensitive = build(json!({ "input": ["rss.title"], "regexp": ["HELLO"] })).unwrap();
        assert!(sensitive.process(vec![two_scalars()]).await.unwrap().is_empty());

        let insensitive = build(json!({
            "input": ["rss.title"],
            "regexp": ["HELLO"],
            "match_case": false,
        }))
        .unwrap();
        assert_eq!(insensitive.process(vec![two_scalars()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn named_groups_come_from_the_config() {
        let mut config = AppConfig::default();
        config.regexp.insert("greetings".into(), vec!["^bye".into(), "^hel".into()]);
        let stage = RegexpMatch::new(context_with(
            PluginType::Process,
            RegexpMatch::NAME,
            json!({ "input": ["rss.title"], "regexp": ["greetings"] }),
            config,
        ))
        .unwrap();
        assert_eq!(stage.process(vec![two_scalars()]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_result() {
        let stage = build(json!({ "input": ["rss.title"], "regexp": ["x"] })).unwrap();
        assert!(stage.process(vec![]).await.unwrap().is_empty());
    }

    #[test]
    fn length_mismatch_always_fails_construction() {
        for (input, regexp) in [
            (json!(["rss.title"]), json!([["a"], ["b"]])),
            (json!(["rss.title", "rss.link"]), json!(["a"])),
            (json!(["rss.title", "rss.link", "rss.guid"]), json!([["a"], ["b"]])),
        ] {
            assert!(matches!(
                build(json!({ "input": input, "regexp": regexp })),
                Err(PluginError::SizeMismatch(_))
            ));
        }
        assert!(matches!(
            build(json!({ "input": ["rss.title"], "output": ["data.text0", "data.text1"], "regexp": ["a"] })),
            Err(PluginError::SizeMismatch(_))
        ));
    }

    #[test]
    fn invalid_configuration_fails_construction() {
        assert!(matches!(
            build(json!({ "input": ["rss.title"], "output": ["data.array0"], "regexp": ["a"] })),
            Err(PluginError::InvalidParam { .. })
        ));
        assert!(matches!(
            build(json!({ "input": ["rss.nope"], "regexp": ["a"] })),
            Err(PluginError::Data(DataError::UnknownField(_)))
        ));
        assert!(matches!(
            build(json!({ "input": ["rss.title"], "regexp": ["("] })),
            Err(PluginError::InvalidParam { .. })
        ));
        assert!(matches!(
            build(json!({ "input": [], "regexp": [] })),
            Err(PluginError::InvalidParam { .. })
        ));
        assert_eq!(
            build(json!({ "input": ["rss.title"] })).err(),
            Some(PluginError::MissingParam("regexp".into()))
        );
    }
}
