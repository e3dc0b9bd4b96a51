use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use uuid::Uuid;

/// Number of generic `data.textN` / `data.arrayN` slots every item carries.
pub const DATA_SLOTS: usize = 20;

const SCALAR_FIELDS: &[&str] = &[
    "rss.title",
    "rss.description",
    "rss.content",
    "rss.link",
    "rss.guid",
    "mail.subject",
    "mail.body",
    "mail.from",
    "twitter.text",
    "twitter.lang",
];

const SEQUENCE_FIELDS: &[&str] = &[
    "rss.categories",
    "rss.links",
    "mail.to",
    "mail.attachments",
    "twitter.tags",
    "twitter.urls",
];

static EMPTY_SCALAR: FieldValue = FieldValue::Scalar(String::new());
static EMPTY_SEQUENCE: FieldValue = FieldValue::Sequence(Vec::new());

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display, AsRefStr, Serialize, Deserialize, JsonSchema)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Scalar,
    Sequence,
}

/// Value stored in one named slot of a [`DataItem`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Scalar(String),
    Sequence(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Scalar(_) => FieldKind::Scalar,
            FieldValue::Sequence(_) => FieldKind::Sequence,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            FieldValue::Scalar(s) => Some(s),
            FieldValue::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[String]> {
        match self {
            FieldValue::Sequence(v) => Some(v),
            FieldValue::Scalar(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Scalar(s) => s.is_empty(),
            FieldValue::Sequence(v) => v.is_empty(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Scalar(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Scalar(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::Sequence(value)
    }
}

impl From<Vec<&str>> for FieldValue {
    fn from(value: Vec<&str>) -> Self {
        FieldValue::Sequence(value.into_iter().map(str::to_string).collect())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataError {
    #[error("unknown data field: {0}")]
    UnknownField(String),

    #[error("data field `{field}` holds a {expected} value, not a {actual}")]
    KindMismatch {
        field: String,
        expected: FieldKind,
        actual: FieldKind,
    },
}

/// Canonical (lowercase, trimmed) spelling of a field name.
pub fn normalize_field(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Resolve the declared kind of a field name.
pub fn field_kind(name: &str) -> Result<FieldKind, DataError> {
    let name = normalize_field(name);

    if let Some(slot) = name.strip_prefix("data.text") {
        if is_data_slot(slot) {
            return Ok(FieldKind::Scalar);
        }
    } else if let Some(slot) = name.strip_prefix("data.array") {
        if is_data_slot(slot) {
            return Ok(FieldKind::Sequence);
        }
    } else if SCALAR_FIELDS.contains(&name.as_str()) {
        return Ok(FieldKind::Scalar);
    } else if SEQUENCE_FIELDS.contains(&name.as_str()) {
        return Ok(FieldKind::Sequence);
    }

    Err(DataError::UnknownField(name))
}

fn is_data_slot(slot: &str) -> bool {
    // "01" is not a slot, only "0".."19".
    if slot.len() > 1 && slot.starts_with('0') {
        return false;
    }
    slot.parse::<usize>().map_or(false, |n| n < DATA_SLOTS)
}

/// One unit of ingested content. Fields are addressed by their declared name,
/// and a field always keeps the kind its name declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredItem")]
pub struct DataItem {
    uid: Uuid,
    flow: String,
    plugin: String,
    time: DateTime<Utc>,
    fields: BTreeMap<String, FieldValue>,
}

/// Wire shape of a [`DataItem`]; fields are checked on the way in.
#[derive(Deserialize)]
struct StoredItem {
    uid: Uuid,
    flow: String,
    plugin: String,
    time: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl TryFrom<StoredItem> for DataItem {
    type Error = DataError;

    fn try_from(stored: StoredItem) -> Result<Self, DataError> {
        let mut item = DataItem {
            uid: stored.uid,
            flow: stored.flow,
            plugin: stored.plugin,
            time: stored.time,
            fields: BTreeMap::new(),
        };
        for (name, value) in stored.fields {
            item.set(&name, value)?;
        }
        Ok(item)
    }
}

impl DataItem {
    pub fn new(flow: impl Into<String>, plugin: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            flow: flow.into(),
            plugin: plugin.into(),
            time: Utc::now(),
            fields: BTreeMap::new(),
        }
    }

    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn flow(&self) -> &str {
        &self.flow
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// Read a field. Declared fields that were never written read as empty.
    pub fn get(&self, name: &str) -> Result<&FieldValue, DataError> {
        let kind = field_kind(name)?;
        match self.fields.get(&normalize_field(name)) {
            Some(value) => Ok(value),
            None => Ok(match kind {
                FieldKind::Scalar => &EMPTY_SCALAR,
                FieldKind::Sequence => &EMPTY_SEQUENCE,
            }),
        }
    }

    /// Replace a field's value. The value must have the field's declared kind.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), DataError> {
        let value = value.into();
        let expected = field_kind(name)?;
        if value.kind() != expected {
            return Err(DataError::KindMismatch {
                field: normalize_field(name),
                expected,
                actual: value.kind(),
            });
        }
        self.fields.insert(normalize_field(name), value);
        Ok(())
    }

    /// Append one element to a sequence field.
    pub fn push(&mut self, name: &str, element: impl Into<String>) -> Result<(), DataError> {
        let expected = field_kind(name)?;
        if expected != FieldKind::Sequence {
            return Err(DataError::KindMismatch {
                field: normalize_field(name),
                expected,
                actual: FieldKind::Sequence,
            });
        }
        // set() never stores a scalar under a sequence name
        if let FieldValue::Sequence(v) = self
            .fields
            .entry(normalize_field(name))
            .or_insert_with(|| FieldValue::Sequence(Vec::new()))
        {
            v.push(element.into());
        }
        Ok(())
    }

    /// Fields that have been written, in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}
