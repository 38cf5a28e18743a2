//! Value-level rules used by the schema validator.

pub mod amounts;
pub mod dates;

pub use amounts::parse_amount;
pub use dates::parse_iso_date;
