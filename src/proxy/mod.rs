//! Logical proxy operations: what a client asked for, checked and typed.
//!
//! Parsing happens in two steps. `AccessTarget::from_body` pulls out only what
//! authorization needs; `ProxyOperation::parse` then runs the full query-safety
//! validation. Nothing reaches `translate` without passing both.

pub mod reshape;
pub mod translate;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::error::ApiError;
use crate::filter::sanitize::{check_function_name, check_table_name};
use crate::filter::{Filter, FilterOptions, QueryConfig};
use crate::rbac::{Action, ResourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Function,
    Stats,
    Health,
}

impl OperationKind {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "select" => OperationKind::Select,
            "insert" => OperationKind::Insert,
            "update" => OperationKind::Update,
            "delete" => OperationKind::Delete,
            "function" => OperationKind::Function,
            "stats" => OperationKind::Stats,
            "health" => OperationKind::Health,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Select => "select",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Function => "function",
            OperationKind::Stats => "stats",
            OperationKind::Health => "health",
        }
    }

    /// Resource kind and action authorization is checked against. `None` for health.
    pub fn permission(&self) -> Option<(ResourceType, Action)> {
        match self {
            OperationKind::Select | OperationKind::Stats => Some((ResourceType::Table, Action::Select)),
            OperationKind::Insert => Some((ResourceType::Table, Action::Insert)),
            OperationKind::Update => Some((ResourceType::Table, Action::Update)),
            OperationKind::Delete => Some((ResourceType::Table, Action::Delete)),
            OperationKind::Function => Some((ResourceType::Function, Action::Execute)),
            OperationKind::Health => None,
        }
    }
}

/// The resource an operation touches, as named by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessTarget {
    pub resource_type: ResourceType,
    pub name: String,
    pub action: Action,
}

impl AccessTarget {
    pub fn from_body(kind: OperationKind, body: &Value) -> Result<Option<Self>, ApiError> {
        let Some((resource_type, action)) = kind.permission() else {
            return Ok(None);
        };
        let field = match resource_type {
            ResourceType::Table => "table",
            ResourceType::Function => "function",
        };
        let name = body
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("Missing required field '{}'", field)))?;
        Ok(Some(Self { resource_type, name: name.to_string(), action }))
    }
}

/// Operations that translate to exactly one upstream request.
#[derive(Debug, Clone)]
pub enum DataOperation {
    Select(Filter),
    Insert { table: String, data: Value },
    Update { filter: Filter, data: Value },
    Delete(Filter),
    Function { name: String, params: Value },
}

/// One named count in a stats batch. Filters are validated when the stat runs.
#[derive(Debug, Clone, PartialEq)]
pub struct StatQuery {
    pub name: String,
    pub filters: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum ProxyOperation {
    Data(DataOperation),
    Stats { table: String, stats: Vec<StatQuery> },
    Health,
}

#[derive(Deserialize)]
struct SelectBody {
    table: String,
    config: Option<QueryConfig>,
}

#[derive(Deserialize)]
struct InsertBody {
    table: String,
    data: Value,
}

#[derive(Deserialize)]
struct UpdateBody {
    table: String,
    #[serde(default)]
    filters: Value,
    data: Value,
}

#[derive(Deserialize)]
struct DeleteBody {
    table: String,
    #[serde(default)]
    filters: Value,
}

#[derive(Deserialize)]
struct FunctionBody {
    function: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct StatsBody {
    table: String,
    stats: StatEntries,
}

/// Stat entries in the order the client wrote them.
struct StatEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for StatEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StatEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of named stats")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<StatEntries, A::Error> {
                let mut entries = Vec::new();
                while let Some((name, value)) = map.next_entry::<String, Value>()? {
                    entries.push((name, value));
                }
                Ok(StatEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl ProxyOperation {
    /// Validate a raw request body into a typed operation.
    pub fn parse(kind: OperationKind, raw: &[u8], options: &FilterOptions) -> Result<Self, ApiError> {
        let raw: &[u8] = if raw.iter().all(u8::is_ascii_whitespace) { b"{}" } else { raw };

        Ok(match kind {
            OperationKind::Health => ProxyOperation::Health,
            OperationKind::Select => {
                let body: SelectBody = decode(raw)?;
                let mut filter = Filter::new(body.table, options.clone())?;
                filter.assign(body.config.unwrap_or_default())?;
                ProxyOperation::Data(DataOperation::Select(filter))
            }
            OperationKind::Insert => {
                let body: InsertBody = decode(raw)?;
                check_table_name(&body.table)?;
                check_rows(&body.data)?;
                ProxyOperation::Data(DataOperation::Insert { table: body.table, data: body.data })
            }
            OperationKind::Update => {
                let body: UpdateBody = decode(raw)?;
                let filter = scoped_filter(body.table, &body.filters, options)?;
                match &body.data {
                    Value::Object(fields) if !fields.is_empty() => {}
                    _ => return Err(ApiError::bad_request("'data' must be a non-empty object")),
                }
                ProxyOperation::Data(DataOperation::Update { filter, data: body.data })
            }
            OperationKind::Delete => {
                let body: DeleteBody = decode(raw)?;
                ProxyOperation::Data(DataOperation::Delete(scoped_filter(body.table, &body.filters, options)?))
            }
            OperationKind::Function => {
                let body: FunctionBody = decode(raw)?;
                check_function_name(&body.function)?;
                let params = match body.params {
                    Value::Null => Value::Object(Default::default()),
                    Value::Object(_) => body.params,
                    _ => return Err(ApiError::bad_request("'params' must be an object")),
                };
                ProxyOperation::Data(DataOperation::Function { name: body.function, params })
            }
            OperationKind::Stats => {
                let body: StatsBody = decode(raw)?;
                check_table_name(&body.table)?;
                if body.stats.0.is_empty() {
                    return Err(ApiError::bad_request("'stats' must name at least one stat"));
                }
                let stats = body
                    .stats
                    .0
                    .into_iter()
                    .map(|(name, spec)| StatQuery {
                        name,
                        filters: spec.get("filters").cloned().filter(|f| !f.is_null()),
                    })
                    .collect();
                ProxyOperation::Stats { table: body.table, stats }
            }
        })
    }

    /// An update or delete whose parsed filter has no row conditions, i.e. every row.
    pub fn is_unscoped_mutation(&self) -> bool {
        match self {
            ProxyOperation::Data(DataOperation::Update { filter, .. })
            | ProxyOperation::Data(DataOperation::Delete(filter)) => !filter.has_conditions(),
            _ => false,
        }
    }
}

fn decode<T: for<'de> Deserialize<'de>>(raw: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(raw).map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

fn scoped_filter(table: String, filters: &Value, options: &FilterOptions) -> Result<Filter, ApiError> {
    let mut filter = Filter::new(table, options.clone())?;
    if !filters.is_null() {
        filter.where_clause(filters)?;
    }
    Ok(filter)
}

/// Insert payloads are one row or a non-empty batch of rows.
fn check_rows(data: &Value) -> Result<(), ApiError> {
    match data {
        Value::Object(_) => Ok(()),
        Value::Array(rows) if !rows.is_empty() && rows.iter().all(Value::is_object) => Ok(()),
        _ => Err(ApiError::bad_request("'data' must be an object or a non-empty array of objects")),
    }
}
