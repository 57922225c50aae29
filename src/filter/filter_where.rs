use serde_json::{Map, Value};

use super::error::FilterError;
use super::sanitize::{check_column_name, encode_value, quote_value, RESERVED_PARAMS};
use super::types::{FilterCondition, FilterOp, FilterValue, GroupKind};

pub struct FilterWhere {
    max_depth: u32,
    conditions: Vec<FilterCondition>,
}

impl FilterWhere {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            conditions: vec![],
        }
    }

    /// Parse a client filter map into validated conditions.
    pub fn parse(where_data: &Value, max_depth: u32) -> Result<Vec<FilterCondition>, FilterError> {
        let mut filter_where = Self::new(max_depth);
        filter_where.parse_where_data(where_data)?;
        Ok(filter_where.conditions)
    }

    /// Render top-level conditions as `(key, value)` query parameters.
    pub fn to_query_pairs(conditions: &[FilterCondition]) -> Vec<(String, String)> {
        conditions
            .iter()
            .map(|condition| match condition {
                FilterCondition::Field { column, op, value } => {
                    (column.clone(), format!("{}.{}", op.token(), Self::render_value(*op, value, false)))
                }
                FilterCondition::Group { kind, conditions } => {
                    (kind.token().to_string(), format!("({})", Self::render_members(conditions)))
                }
            })
            .collect()
    }

    fn render_members(conditions: &[FilterCondition]) -> String {
        conditions
            .iter()
            .map(|condition| match condition {
                FilterCondition::Field { column, op, value } => {
                    format!("{}.{}.{}", column, op.token(), Self::render_value(*op, value, true))
                }
                FilterCondition::Group { kind, conditions } => {
                    format!("{}({})", kind.token(), Self::render_members(conditions))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Scalars inside a logic group are quoted; top-level scalars are taken verbatim upstream.
    fn render_value(op: FilterOp, value: &FilterValue, in_group: bool) -> String {
        match value {
            FilterValue::Scalar(s) if in_group => quote_value(s),
            FilterValue::Scalar(s) => encode_value(s),
            FilterValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(|s| quote_value(s)).collect();
                if matches!(op, FilterOp::Contains | FilterOp::ContainedIn) {
                    format!("{{{}}}", rendered.join(","))
                } else {
                    format!("({})", rendered.join(","))
                }
            }
            FilterValue::Null => "null".to_string(),
            FilterValue::Bool(b) => b.to_string(),
        }
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null => Ok(()),
            Value::Object(obj) => {
                let conditions = self.parse_object(obj, 0)?;
                self.conditions.extend(conditions);
                Ok(())
            }
            _ => Err(FilterError::InvalidFilter("filters must be an object".to_string())),
        }
    }

    fn parse_object(&self, obj: &Map<String, Value>, depth: u32) -> Result<Vec<FilterCondition>, FilterError> {
        let mut out = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "or" | "$or" => out.push(self.parse_group(GroupKind::Or, value, depth + 1)?),
                "and" | "$and" => out.push(self.parse_group(GroupKind::And, value, depth + 1)?),
                field => out.extend(Self::parse_field_condition(field, value)?),
            }
        }
        Ok(out)
    }

    fn parse_group(&self, kind: GroupKind, value: &Value, depth: u32) -> Result<FilterCondition, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::TooDeep(self.max_depth));
        }
        let members = value
            .as_array()
            .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} group requires an array", kind.token())))?;
        if members.is_empty() {
            return Err(FilterError::InvalidOperatorData(format!("{} group cannot be empty", kind.token())));
        }

        let mut conditions = Vec::new();
        for member in members {
            let obj = member.as_object().ok_or_else(|| {
                FilterError::InvalidOperatorData(format!("{} group members must be objects", kind.token()))
            })?;
            let mut parsed = self.parse_object(obj, depth)?;
            match parsed.len() {
                0 => {
                    return Err(FilterError::InvalidOperatorData(format!(
                        "{} group members cannot be empty",
                        kind.token()
                    )))
                }
                // A member with several conditions means all of them
                1 => conditions.push(parsed.remove(0)),
                _ => conditions.push(FilterCondition::Group { kind: GroupKind::And, conditions: parsed }),
            }
        }
        Ok(FilterCondition::Group { kind, conditions })
    }

    fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<FilterCondition>, FilterError> {
        check_column_name(field)?;
        if RESERVED_PARAMS.contains(&field) {
            return Err(FilterError::InvalidColumn(format!(
                "'{}' is a reserved query parameter and cannot be filtered on",
                field
            )));
        }

        if let Value::Object(obj) = value {
            if obj.is_empty() {
                return Err(FilterError::InvalidFilter(format!("no operator given for '{}'", field)));
            }
            let mut out = Vec::new();
            for (op_key, op_val) in obj {
                let op = FilterOp::parse(op_key)?;
                let value = Self::parse_operand(field, op, op_val)?;
                out.push(FilterCondition::Field { column: field.to_string(), op, value });
            }
            Ok(out)
        } else {
            // Implicit equality: { field: value }
            let (op, value) = match value {
                Value::Null => (FilterOp::Is, FilterValue::Null),
                other => (FilterOp::Eq, Self::parse_operand(field, FilterOp::Eq, other)?),
            };
            Ok(vec![FilterCondition::Field { column: field.to_string(), op, value }])
        }
    }

    fn parse_operand(field: &str, op: FilterOp, value: &Value) -> Result<FilterValue, FilterError> {
        match op {
            FilterOp::Is | FilterOp::NotIs => match value {
                Value::Null => Ok(FilterValue::Null),
                Value::Bool(b) => Ok(FilterValue::Bool(*b)),
                Value::String(s) if s == "null" => Ok(FilterValue::Null),
                _ => Err(FilterError::InvalidOperatorData(format!(
                    "'{}' on '{}' accepts only null, true or false",
                    op.token(),
                    field
                ))),
            },
            op if op.takes_list() => {
                let items = value.as_array().ok_or_else(|| {
                    FilterError::InvalidOperatorData(format!("'{}' on '{}' requires an array", op.token(), field))
                })?;
                let items = items
                    .iter()
                    .map(|v| Self::scalar_to_string(field, v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FilterValue::List(items))
            }
            _ => Ok(FilterValue::Scalar(Self::scalar_to_string(field, value)?)),
        }
    }

    fn scalar_to_string(field: &str, value: &Value) -> Result<String, FilterError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(FilterError::InvalidOperatorData(format!(
                "value for '{}' must be a string, number or boolean",
                field
            ))),
        }
    }
}
