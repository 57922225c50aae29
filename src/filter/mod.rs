//! Query-safety layer: every table name, column, operator and filter value
//! passes through here before it can reach an upstream URL.

pub mod types;
pub mod filter;
pub mod filter_where;
pub mod filter_order;
pub mod sanitize;
pub mod error;

pub use types::*;
pub use filter::{join_pairs, Filter};
pub use error::FilterError;
pub use sanitize::{encode_value, quote_value, validate_function_name, validate_query_input, validate_table_name};
