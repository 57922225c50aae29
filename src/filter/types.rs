use serde::Deserialize;
use serde_json::Value;

use super::error::FilterError;
use crate::config::FilterConfig;

/// Operators a client may use in a filter. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    Is,
    NotIs,
    Contains,
    ContainedIn,
}

impl FilterOp {
    pub fn parse(key: &str) -> Result<Self, FilterError> {
        Ok(match key.trim_start_matches('$') {
            "eq" => FilterOp::Eq,
            "neq" | "ne" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "in" => FilterOp::In,
            "not_in" | "nin" => FilterOp::NotIn,
            "is" => FilterOp::Is,
            "not_is" => FilterOp::NotIs,
            "cs" | "contains" => FilterOp::Contains,
            "cd" | "contained_in" => FilterOp::ContainedIn,
            other => return Err(FilterError::UnsupportedOperator(other.to_string())),
        })
    }

    /// Operator token in the upstream filter syntax.
    pub fn token(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::ILike => "ilike",
            FilterOp::In => "in",
            FilterOp::NotIn => "not.in",
            FilterOp::Is => "is",
            FilterOp::NotIs => "not.is",
            FilterOp::Contains => "cs",
            FilterOp::ContainedIn => "cd",
        }
    }

    pub fn takes_list(&self) -> bool {
        matches!(self, FilterOp::In | FilterOp::NotIn | FilterOp::Contains | FilterOp::ContainedIn)
    }
}

/// A filter operand after shape validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(String),
    List(Vec<String>),
    Null,
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Or,
    And,
}

impl GroupKind {
    pub fn token(&self) -> &'static str {
        match self {
            GroupKind::Or => "or",
            GroupKind::And => "and",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterCondition {
    Field {
        column: String,
        op: FilterOp,
        value: FilterValue,
    },
    Group {
        kind: GroupKind,
        conditions: Vec<FilterCondition>,
    },
}

/// Query configuration as sent by clients in `config`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryConfig {
    pub select: Option<Value>,
    pub filters: Option<Value>,
    pub ordering: Option<Value>,
    pub pagination: Option<Pagination>,
    pub count: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn token(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterOrderInfo {
    pub column: String,
    pub sort: SortDirection,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub max_limit: Option<u64>,
    pub max_nested_depth: u32,
    pub debug_logging: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            max_limit: None,
            max_nested_depth: 5,
            debug_logging: false,
        }
    }
}

impl From<&FilterConfig> for FilterOptions {
    fn from(config: &FilterConfig) -> Self {
        Self {
            max_limit: config.max_limit,
            max_nested_depth: config.max_nested_depth,
            debug_logging: config.debug_logging,
        }
    }
}

/// Outcome of a safety check, reported rather than raised.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self { valid: true, reason: None }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

impl From<Result<(), FilterError>> for Validation {
    fn from(result: Result<(), FilterError>) -> Self {
        match result {
            Ok(()) => Validation::ok(),
            Err(e) => Validation::invalid(e.to_string()),
        }
    }
}
