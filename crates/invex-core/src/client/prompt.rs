//! Extraction prompt rendered from the configured schema.

use crate::models::schema::{FieldSpec, InvoiceSchema};

const PREAMBLE: &str = "\
You are an expert in document understanding and structured data extraction from financial documents such as invoices.

The invoice is provided below as page images or as extracted text.

Extract the fields listed in the expected JSON response. If a value is not present in the invoice, use null for it.
Trim all string values of surrounding whitespace.
Respond with the JSON object only.

Expected JSON response:
";

/// Render the full prompt for `schema`.
pub fn render_prompt(schema: &InvoiceSchema) -> String {
    let mut out = String::from(PREAMBLE);
    out.push_str("{\n");

    let mut entries: Vec<String> = schema.fields.iter().map(|f| entry(f, "  ")).collect();

    if !schema.line_item_fields.is_empty() {
        let items: Vec<String> = schema
            .line_item_fields
            .iter()
            .map(|f| entry(f, "      "))
            .collect();
        entries.push(format!(
            "  {}: [\n    {{\n{}\n    }}\n  ]",
            quote(&schema.line_items_key),
            items.join(",\n")
        ));
    }

    out.push_str(&entries.join(",\n"));
    out.push_str("\n}\n");
    out
}

fn entry(field: &FieldSpec, indent: &str) -> String {
    format!("{}{}: {}", indent, quote(&field.name), quote(&field.placeholder()))
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::extract_json_object;

    #[test]
    fn test_prompt_lists_every_field() {
        let schema = InvoiceSchema::default();
        let prompt = render_prompt(&schema);

        for field in schema.fields.iter().chain(schema.line_item_fields.iter()) {
            assert!(prompt.contains(&format!("\"{}\"", field.name)), "missing {}", field.name);
        }
        assert!(prompt.contains("\"invoice_date\": \"YYYY-MM-DD or null\""));
        assert!(prompt.contains("\"amount\": \"string or null rate x qty\""));
    }

    #[test]
    fn test_prompt_skeleton_is_valid_json() {
        let prompt = render_prompt(&InvoiceSchema::default());
        let skeleton = extract_json_object(&prompt).unwrap();
        assert_eq!(skeleton.len(), 14);
        assert!(skeleton["line_items"].is_array());
    }

    #[test]
    fn test_prompt_without_line_items() {
        let mut schema = InvoiceSchema::default();
        schema.line_item_fields.clear();
        schema.line_item_check = None;
        let prompt = render_prompt(&schema);
        assert!(!prompt.contains("line_items"));
    }
}
