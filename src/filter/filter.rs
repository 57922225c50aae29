use serde_json::Value;

use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::sanitize::{check_column_name, check_table_name};
use super::types::{FilterCondition, FilterOptions, FilterOrderInfo, QueryConfig};

/// Validated description of one table query, rendered as upstream query parameters.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    select_columns: Vec<String>,
    conditions: Vec<FilterCondition>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<u64>,
    offset: Option<u64>,
    exact_count: bool,
    options: FilterOptions,
}

impl Filter {
    pub fn new(table_name: impl Into<String>, options: FilterOptions) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        check_table_name(&table_name)?;
        Ok(Self {
            table_name,
            select_columns: vec![],
            conditions: vec![],
            order_data: vec![],
            limit: None,
            offset: None,
            exact_count: false,
            options,
        })
    }

    pub fn assign(&mut self, data: QueryConfig) -> Result<&mut Self, FilterError> {
        if let Some(select) = data.select { self.select(&select)?; }
        if let Some(filters) = data.filters { self.where_clause(&filters)?; }
        if let Some(ordering) = data.ordering { self.order(&ordering)?; }
        if let Some(pagination) = data.pagination {
            match pagination.limit {
                Some(limit) => { self.limit(limit, pagination.offset)?; }
                None => { self.offset(pagination.offset)?; }
            }
        }
        if let Some(count) = data.count {
            match count.as_str() {
                "exact" => self.exact_count = true,
                "none" => self.exact_count = false,
                other => return Err(FilterError::InvalidFilter(format!("unknown count mode '{}'", other))),
            }
        }
        Ok(self)
    }

    pub fn select(&mut self, select: &Value) -> Result<&mut Self, FilterError> {
        let columns: Vec<String> = match select {
            Value::Null => vec![],
            Value::String(s) => s.split(',').map(|c| c.trim().to_string()).collect(),
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|s| s.trim().to_string())
                        .ok_or_else(|| FilterError::InvalidColumn("select entries must be strings".to_string()))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(FilterError::InvalidColumn("select must be a string or array".to_string())),
        };
        Self::validate_select_columns(&columns)?;
        self.select_columns = columns;
        Ok(self)
    }

    pub fn where_clause(&mut self, filters: &Value) -> Result<&mut Self, FilterError> {
        self.conditions = FilterWhere::parse(filters, self.options.max_nested_depth)?;
        Ok(self)
    }

    pub fn order(&mut self, order_spec: &Value) -> Result<&mut Self, FilterError> {
        self.order_data = FilterOrder::validate_and_parse(order_spec)?;
        Ok(self)
    }

    pub fn limit(&mut self, limit: i64, offset: Option<i64>) -> Result<&mut Self, FilterError> {
        if limit < 0 { return Err(FilterError::InvalidLimit("Limit must be non-negative".to_string())); }

        // Apply max limit from config
        let limit = limit as u64;
        let max_limit = self.options.max_limit.unwrap_or(u64::MAX);
        let applied_limit = if limit > max_limit {
            if self.options.debug_logging {
                tracing::warn!("Limit {} exceeds max {}, capping to max", limit, max_limit);
            }
            max_limit
        } else {
            limit
        };

        self.limit = Some(applied_limit);
        self.offset(offset)?;
        Ok(self)
    }

    fn offset(&mut self, offset: Option<i64>) -> Result<&mut Self, FilterError> {
        if let Some(off) = offset {
            if off < 0 { return Err(FilterError::InvalidOffset("Offset must be non-negative".to_string())); }
            self.offset = Some(off as u64);
        }
        Ok(self)
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    pub fn exact_count(&self) -> bool {
        self.exact_count
    }

    /// All parameters of a read: select, filters, order, limit, offset.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        if let Some(select) = self.build_select_clause() {
            pairs.push(("select".to_string(), select));
        }
        pairs.extend(FilterWhere::to_query_pairs(&self.conditions));
        if let Some(order) = FilterOrder::generate(&self.order_data) {
            pairs.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        pairs
    }

    /// Only the row-identifying filter parameters, for update/delete/count.
    pub fn to_filter_pairs(&self) -> Vec<(String, String)> {
        FilterWhere::to_query_pairs(&self.conditions)
    }

    pub fn to_query_string(&self) -> String {
        join_pairs(&self.to_query_pairs())
    }

    pub fn to_filter_string(&self) -> String {
        join_pairs(&self.to_filter_pairs())
    }

    fn validate_select_columns(columns: &[String]) -> Result<(), FilterError> {
        for column in columns {
            if column == "*" { continue; }
            if column.is_empty() { return Err(FilterError::InvalidColumn("Column name cannot be empty".to_string())); }
            check_column_name(column)?;
        }
        Ok(())
    }

    fn build_select_clause(&self) -> Option<String> {
        if self.select_columns.is_empty() {
            None
        } else if self.select_columns.iter().any(|c| c == "*") {
            Some("*".to_string())
        } else {
            Some(self.select_columns.join(","))
        }
    }
}

/// Keys are identifiers and values are already encoded, so plain joining is safe.
pub fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
