//! Validated invoice records.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// Ordered field name to nullable string value.
///
/// Serializes as a JSON object with keys in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap(Vec<(String, Option<String>)>);

impl FieldMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Set a field, replacing any existing value.
    pub fn insert(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    /// Value of a field; `None` for both null and undeclared.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of non-null values.
    pub fn filled(&self) -> usize {
        self.0.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A single line item. Key set equals the schema's line item fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
#[serde(transparent)]
pub struct LineItem(pub FieldMap);

impl LineItem {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name)
    }
}

/// A validated invoice.
///
/// Every declared schema field is present, defaulted to null; unknown keys
/// from the model reply never appear here.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct InvoiceRecord {
    pub fields: FieldMap,

    pub line_items: Vec<LineItem>,

    /// Soft schema mismatches and arithmetic inconsistencies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InvoiceRecord {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name)
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
