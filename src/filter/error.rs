use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Invalid function name: {0}")]
    InvalidFunctionName(String),

    #[error("Invalid column name: {0}")]
    InvalidColumn(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid ordering: {0}")]
    InvalidOrdering(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    #[error("Filter nesting exceeds maximum depth of {0}")]
    TooDeep(u32),

    #[error("Invalid query configuration: {0}")]
    JsonError(#[from] serde_json::Error),
}
