//! Typed access to the free-form `params` block of a stage.
use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::plugin::PluginError;

/// Parameters every stage accepts regardless of its own contract.
pub const GATE_PARAMS: &[&str] = &["include", "require"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginParams {
    values: Map<String, Value>,
}

impl PluginParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// `null` (an empty `params:` block) is accepted as no parameters.
    pub fn from_value(value: Value) -> Result<Self, PluginError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(values) => Ok(Self { values }),
            other => Err(PluginError::invalid("params", format!("expected a map, got {other}"))),
        }
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| !v.is_null())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|v| !v.is_null())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Reject unknown keys, then missing required ones. Keys are reported in
    /// sorted order so the same config always yields the same error.
    pub fn check(&self, required: &[&str], optional: &[&str]) -> Result<(), PluginError> {
        let known: BTreeSet<&str> = required
            .iter()
            .chain(optional)
            .chain(GATE_PARAMS)
            .copied()
            .collect();

        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        if let Some(unknown) = keys.into_iter().find(|k| !known.contains(k)) {
            return Err(PluginError::UnknownParam(unknown.to_string()));
        }

        let mut required = required.to_vec();
        required.sort_unstable();
        if let Some(missing) = required.into_iter().find(|k| !self.is_set(k)) {
            return Err(PluginError::MissingParam(missing.to_string()));
        }
        Ok(())
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, PluginError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(PluginError::invalid(key, format!("expected a bool, got {other}"))),
        }
    }

    pub fn string(&self, key: &str) -> Result<Option<String>, PluginError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(PluginError::invalid(key, format!("expected a string, got {other}"))),
        }
    }

    /// A list of strings. A lone string is taken as a list of one.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, PluginError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => string_list(key, value).map(Some),
        }
    }

    /// A list of non-negative integers (stage ids).
    pub fn id_list(&self, key: &str) -> Result<Option<Vec<usize>>, PluginError> {
        let items = match self.get(key) {
            None => return Ok(None),
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Number(_)) => vec![single.clone()],
            Some(other) => {
                return Err(PluginError::invalid(key, format!("expected a list of ids, got {other}")));
            }
        };

        items
            .iter()
            .map(|v| {
                v.as_u64()
                    .map(|n| n as usize)
                    .ok_or_else(|| PluginError::invalid(key, format!("`{v}` is not a stage id")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

/// Turn a JSON value into a list of strings, or explain why it is not one.
pub fn string_list(key: &str, value: &Value) -> Result<Vec<String>, PluginError> {
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(PluginError::invalid(key, format!("`{other}` is not a string"))),
            })
            .collect(),
        other => Err(PluginError::invalid(key, format!("expected a list of strings, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> PluginParams {
        PluginParams::from_value(v).unwrap()
    }

    #[test]
    fn null_params_are_empty() {
        assert_eq!(params(Value::Null), PluginParams::default());
        assert!(PluginParams::from_value(json!([1])).is_err());
    }

    #[test]
    fn check_reports_unknown_before_missing() {
        let p = params(json!({ "zzz": 1, "aaa": 2 }));
        assert_eq!(
            p.check(&["input"], &[]),
            Err(PluginError::UnknownParam("aaa".into()))
        );

        let p = params(json!({ "include": true }));
        assert_eq!(
            p.check(&["regexp", "input"], &[]),
            Err(PluginError::MissingParam("input".into()))
        );
        assert!(params(json!({ "input": ["x"], "require": [1] })).check(&["input"], &[]).is_ok());
    }

    #[test]
    fn typed_getters() {
        let p = params(json!({
            "flag": true,
            "name": "x",
            "one": "only",
            "many": ["a", "b"],
            "ids": [0, 2],
            "bad": [1, "a"],
        }));
        assert_eq!(p.bool("flag").unwrap(), Some(true));
        assert_eq!(p.bool("absent").unwrap(), None);
        assert!(p.bool("name").is_err());
        assert_eq!(p.string("name").unwrap(), Some("x".into()));
        assert_eq!(p.string_list("one").unwrap(), Some(vec!["only".into()]));
        assert_eq!(p.string_list("many").unwrap(), Some(vec!["a".into(), "b".into()]));
        assert_eq!(p.id_list("ids").unwrap(), Some(vec![0, 2]));
        assert!(p.id_list("bad").is_err());
        assert!(p.string_list("bad").is_err());
    }
}
