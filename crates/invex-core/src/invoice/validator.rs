//! Mapping decoded model JSON onto the declared invoice schema.

use rust_decimal::Decimal;
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::invoice::{FieldMap, InvoiceRecord, LineItem};
use crate::models::schema::{FieldSpec, FieldType, InvoiceSchema, LineItemCheck};

use super::rules::{parse_amount, parse_iso_date};

/// Coerces decoded JSON into an [`InvoiceRecord`].
///
/// Never rejects a document: type mismatches become nulls with a warning
/// and arithmetic inconsistencies are reported as warnings.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: InvoiceSchema,
    tolerance: Decimal,
}

impl SchemaValidator {
    /// Create a validator with a one-cent arithmetic tolerance.
    pub fn new(schema: InvoiceSchema) -> Self {
        Self {
            schema,
            tolerance: Decimal::new(1, 2),
        }
    }

    /// Set the allowed difference between quantity x price and amount.
    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = tolerance.abs();
        self
    }

    pub fn schema(&self) -> &InvoiceSchema {
        &self.schema
    }

    /// Produce a record whose key set equals the schema's exactly.
    pub fn validate(&self, object: &Map<String, Value>) -> InvoiceRecord {
        let mut warnings = Vec::new();

        let mut fields = FieldMap::new();
        for spec in &self.schema.fields {
            let value = coerce(spec, object.get(&spec.name), &spec.name, &mut warnings);
            fields.insert(spec.name.clone(), value);
        }

        let dropped: Vec<&str> = object
            .keys()
            .map(String::as_str)
            .filter(|k| *k != self.schema.line_items_key && self.schema.field(k).is_none())
            .collect();
        if !dropped.is_empty() {
            debug!("Dropping undeclared fields: {}", dropped.join(", "));
        }

        let line_items = self.line_items(object.get(&self.schema.line_items_key), &mut warnings);

        InvoiceRecord {
            fields,
            line_items,
            warnings,
        }
    }

    fn line_items(&self, value: Option<&Value>, warnings: &mut Vec<String>) -> Vec<LineItem> {
        let key = &self.schema.line_items_key;
        let items = match value {
            None | Some(Value::Null) => return Vec::new(),
            Some(Value::Array(items)) => items,
            Some(other) => {
                warnings.push(format!("{}: expected array, found {}", key, type_name(other)));
                return Vec::new();
            }
        };

        let mut result = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let label = format!("{}[{}]", key, i);

            let Value::Object(obj) = item else {
                warnings.push(format!("{}: expected object, found {}; dropped", label, type_name(item)));
                continue;
            };

            if !self.schema.line_item_fields.iter().any(|f| obj.contains_key(&f.name)) {
                warnings.push(format!("{}: no declared line item fields; dropped", label));
                continue;
            }

            let mut fields = FieldMap::new();
            for spec in &self.schema.line_item_fields {
                let context = format!("{}.{}", label, spec.name);
                let value = coerce(spec, obj.get(&spec.name), &context, warnings);
                fields.insert(spec.name.clone(), value);
            }
            let item = LineItem(fields);

            if let Some(check) = &self.schema.line_item_check {
                if let Some(warning) = check_arithmetic(&item, check, self.tolerance) {
                    warnings.push(format!("{}: {}", label, warning));
                }
            }

            result.push(item);
        }

        result
    }
}

/// Warning text when `quantity x unit price` differs from `amount`.
///
/// Returns `None` when any of the three values is missing or not numeric.
/// Values whose product or difference leaves the decimal range are reported
/// rather than compared.
pub fn check_arithmetic(item: &LineItem, check: &LineItemCheck, tolerance: Decimal) -> Option<String> {
    let quantity = item.get(&check.quantity).and_then(parse_amount)?;
    let unit_price = item.get(&check.unit_price).and_then(parse_amount)?;
    let amount = item.get(&check.amount).and_then(parse_amount)?;

    let Some((expected, diff)) = quantity
        .checked_mul(unit_price)
        .and_then(|expected| Some((expected, expected.checked_sub(amount)?)))
    else {
        return Some(format!(
            "{} x {} cannot be compared with {}: value out of range",
            check.quantity, check.unit_price, check.amount
        ));
    };
    if diff.abs() <= tolerance {
        return None;
    }

    Some(format!(
        "{} x {} = {} but {} is {}",
        check.quantity, check.unit_price, expected, check.amount, amount
    ))
}

fn coerce(spec: &FieldSpec, value: Option<&Value>, context: &str, warnings: &mut Vec<String>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => {
            warnings.push(format!("{}: expected string, found {}", context, type_name(other)));
            return None;
        }
    };

    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        return None;
    }

    if spec.kind == FieldType::Date && parse_iso_date(&text).is_none() {
        warnings.push(format!("{}: '{}' is not an ISO date", context, text));
    }

    Some(text)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
