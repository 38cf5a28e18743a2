//! Configurable extraction schema.
//!
//! The schema drives three things: the field list rendered into the prompt,
//! the key set enforced by the validator, and the columns of the CSV export.

use serde::{Deserialize, Serialize};

/// Expected type of a schema field.
///
/// All values stay strings; `Date` only adds an ISO `YYYY-MM-DD` check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    #[default]
    String,
    Date,
}

/// A single declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON key the model is asked to emit.
    pub name: String,

    #[serde(default)]
    pub kind: FieldType,

    /// Extra guidance appended to the type placeholder in the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FieldSpec {
    pub fn string(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldType::String,
            hint: None,
        }
    }

    pub fn date(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldType::Date,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }

    /// Placeholder shown to the model, e.g. `"YYYY-MM-DD or null"`.
    pub fn placeholder(&self) -> String {
        let base = match self.kind {
            FieldType::String => "string or null",
            FieldType::Date => "YYYY-MM-DD or null",
        };
        match &self.hint {
            Some(hint) => format!("{} {}", base, hint),
            None => base.to_string(),
        }
    }
}

/// Names of the line-item fields used for the quantity x price check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemCheck {
    pub quantity: String,
    pub unit_price: String,
    pub amount: String,
}

impl Default for LineItemCheck {
    fn default() -> Self {
        Self {
            quantity: "quantity".to_string(),
            unit_price: "rate_or_unit_price".to_string(),
            amount: "amount".to_string(),
        }
    }
}

/// The full set of fields to extract from one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvoiceSchema {
    /// Top-level scalar fields, in export order.
    pub fields: Vec<FieldSpec>,

    /// Key holding the nested line item array.
    pub line_items_key: String,

    /// Fields of each line item.
    pub line_item_fields: Vec<FieldSpec>,

    /// Arithmetic cross-check, disabled when `None`.
    pub line_item_check: Option<LineItemCheck>,
}

impl Default for InvoiceSchema {
    fn default() -> Self {
        Self {
            fields: vec![
                FieldSpec::date("invoice_date"),
                FieldSpec::string("invoice_number"),
                FieldSpec::string("purchase_order_number"),
                FieldSpec::date("purchase_order_date"),
                FieldSpec::string("phone_number"),
                FieldSpec::string("supplier_name"),
                FieldSpec::string("supplier_address"),
                FieldSpec::string("customer_name"),
                FieldSpec::string("customer_address"),
                FieldSpec::string("currency"),
                FieldSpec::string("sub_total"),
                FieldSpec::string("total_tax_amount"),
                FieldSpec::string("total_amount"),
            ],
            line_items_key: "line_items".to_string(),
            line_item_fields: vec![
                FieldSpec::string("item_number"),
                FieldSpec::string("item_name"),
                FieldSpec::string("quantity"),
                FieldSpec::string("unit_of_measure"),
                FieldSpec::string("rate_or_unit_price").with_hint("price per unit"),
                FieldSpec::string("amount").with_hint("rate x qty"),
                FieldSpec::string("tax_percentage"),
                FieldSpec::string("tax_amount"),
                FieldSpec::string("net_amount"),
            ],
            line_item_check: Some(LineItemCheck::default()),
        }
    }
}

impl InvoiceSchema {
    /// Top-level field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check the schema is usable: no empty or duplicate names, and the
    /// arithmetic check only references declared line-item fields.
    pub fn validate(&self) -> Result<(), String> {
        check_names(&self.fields, "field")?;
        check_names(&self.line_item_fields, "line item field")?;

        if self.fields.iter().any(|f| f.name == self.line_items_key) {
            return Err(format!(
                "line items key '{}' collides with a scalar field",
                self.line_items_key
            ));
        }

        if let Some(check) = &self.line_item_check {
            for name in [&check.quantity, &check.unit_price, &check.amount] {
                if !self.line_item_fields.iter().any(|f| &f.name == name) {
                    return Err(format!("line item check references unknown field '{}'", name));
                }
            }
        }

        Ok(())
    }
}

fn check_names(fields: &[FieldSpec], what: &str) -> Result<(), String> {
    let mut seen = std::collections::HashSet::new();
    for field in fields {
        if field.name.trim().is_empty() {
            return Err(format!("empty {} name", what));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(format!("duplicate {} '{}'", what, field.name));
        }
    }
    Ok(())
}
