use serde_json::Value;

use super::error::FilterError;
use super::filter::Filter;
use super::types::{FilterOptions, QueryConfig, Validation};

const MAX_IDENTIFIER_LEN: usize = 63;

/// Characters that carry structure in the upstream filter grammar.
const RESERVED: &[char] = &[',', '.', ':', '(', ')', '"', '\\'];

/// Query keys the upstream reads as request options rather than row filters.
pub const RESERVED_PARAMS: &[&str] = &["select", "limit", "offset", "order", "columns", "on_conflict", "or", "and", "not"];

/// Letters, digits and underscore, starting with a letter or underscore.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_IDENTIFIER_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn check_table_name(name: &str) -> Result<(), FilterError> {
    if name.is_empty() {
        return Err(FilterError::InvalidTableName("Table name cannot be empty".to_string()));
    }
    if !is_identifier(name) {
        return Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)));
    }
    Ok(())
}

pub fn check_function_name(name: &str) -> Result<(), FilterError> {
    if name.is_empty() {
        return Err(FilterError::InvalidFunctionName("Function name cannot be empty".to_string()));
    }
    if !is_identifier(name) {
        return Err(FilterError::InvalidFunctionName(format!("Invalid function name format: {}", name)));
    }
    Ok(())
}

pub fn check_column_name(name: &str) -> Result<(), FilterError> {
    if !is_identifier(name) {
        return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", name)));
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Validation {
    check_table_name(name).into()
}

pub fn validate_function_name(name: &str) -> Validation {
    check_function_name(name).into()
}

/// Validate a client `config` object without building anything from it.
pub fn validate_query_input(config: &Value, options: &FilterOptions) -> Validation {
    let result = serde_json::from_value::<QueryConfig>(config.clone())
        .map_err(FilterError::from)
        .and_then(|config| {
            // The table is irrelevant to the shape check
            let mut filter = Filter::new("_", options.clone())?;
            filter.assign(config)?;
            Ok(())
        });
    result.into()
}

/// Encode a top-level `column=op.value` operand.
///
/// The upstream takes everything after the operator token verbatim here, so
/// the literal is only percent-encoded. Quoting it would make the quotes part
/// of the compared value.
pub fn encode_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Encode an operand that sits inside an `in.(...)` list or an `or`/`and`
/// group, where `,` `.` `:` and parentheses are structure.
///
/// Values containing reserved characters (or whitespace, or nothing at all)
/// are double-quoted with `\` and `"` escaped, so the upstream parser reads
/// them as a single literal. The literal is then percent-encoded for the URL.
pub fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty() || value.chars().any(|c| RESERVED.contains(&c) || c.is_whitespace());
    let literal = if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    };
    encode_value(&literal)
}
