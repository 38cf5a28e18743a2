//! Reply parsing and schema validation.

mod parser;
pub mod rules;
mod validator;

pub use parser::{ExtractionReply, extract_json_object};
pub use validator::{SchemaValidator, check_arithmetic};
