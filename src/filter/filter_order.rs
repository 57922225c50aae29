use serde_json::Value;

use super::error::FilterError;
use super::sanitize::check_column_name;
use super::types::{FilterOrderInfo, NullsOrder, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        match order {
            Value::Null => Ok(vec![]),
            Value::String(s) => Self::parse_order_string(s),
            // { "field": "created_at", "direction": "desc" }
            Value::Object(_) => Ok(vec![Self::parse_order_object(order)?]),
            // [{ "field": ... }, "name asc"]
            Value::Array(arr) => {
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)?),
                        Value::Object(_) => out.push(Self::parse_order_object(v)?),
                        _ => return Err(FilterError::InvalidOrdering("ordering entries must be objects or strings".to_string())),
                    }
                }
                Ok(out)
            }
            _ => Err(FilterError::InvalidOrdering("ordering must be an object, array or string".to_string())),
        }
    }

    fn parse_order_object(value: &Value) -> Result<FilterOrderInfo, FilterError> {
        let field = value
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| FilterError::InvalidOrdering("ordering requires a 'field'".to_string()))?;
        check_column_name(field)?;

        let sort = match value.get("direction") {
            None | Some(Value::Null) => SortDirection::Asc,
            Some(Value::String(dir)) => Self::parse_direction(dir)?,
            Some(_) => return Err(FilterError::InvalidOrdering("direction must be a string".to_string())),
        };

        let nulls = match value.get("nulls").and_then(Value::as_str) {
            None => None,
            Some(n) if n.eq_ignore_ascii_case("first") => Some(NullsOrder::First),
            Some(n) if n.eq_ignore_ascii_case("last") => Some(NullsOrder::Last),
            Some(other) => return Err(FilterError::InvalidOrdering(format!("unknown nulls placement '{}'", other))),
        };

        Ok(FilterOrderInfo { column: field.to_string(), sort, nulls })
    }

    fn parse_order_string(s: &str) -> Result<Vec<FilterOrderInfo>, FilterError> {
        // split on commas, then each token into column and direction
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                check_column_name(col)?;
                let sort = match it.next() {
                    Some(dir) => Self::parse_direction(dir)?,
                    None => SortDirection::Asc,
                };
                out.push(FilterOrderInfo { column: col.to_string(), sort, nulls: None });
            }
        }
        Ok(out)
    }

    fn parse_direction(dir: &str) -> Result<SortDirection, FilterError> {
        if dir.eq_ignore_ascii_case("asc") {
            Ok(SortDirection::Asc)
        } else if dir.eq_ignore_ascii_case("desc") {
            Ok(SortDirection::Desc)
        } else {
            Err(FilterError::InvalidOrdering(format!("unknown direction '{}'", dir)))
        }
    }

    /// Render as the value of the upstream `order` parameter.
    pub fn generate(infos: &[FilterOrderInfo]) -> Option<String> {
        if infos.is_empty() { return None; }
        let parts: Vec<String> = infos
            .iter()
            .map(|i| match i.nulls {
                Some(NullsOrder::First) => format!("{}.{}.nullsfirst", i.column, i.sort.token()),
                Some(NullsOrder::Last) => format!("{}.{}.nullslast", i.column, i.sort.token()),
                None => format!("{}.{}", i.column, i.sort.token()),
            })
            .collect();
        Some(parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_form() {
        let infos = FilterOrder::validate_and_parse(&json!({"field": "created_at", "direction": "DESC"})).unwrap();
        assert_eq!(FilterOrder::generate(&infos).unwrap(), "created_at.desc");
    }

    #[test]
    fn array_and_string_forms() {
        let infos = FilterOrder::validate_and_parse(&json!([
            {"field": "due_date", "nulls": "last"},
            "name desc, id"
        ]))
        .unwrap();
        assert_eq!(FilterOrder::generate(&infos).unwrap(), "due_date.asc.nullslast,name.desc,id.asc");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(FilterOrder::validate_and_parse(&json!({"field": "name;drop"})).is_err());
        assert!(FilterOrder::validate_and_parse(&json!({"field": "name", "direction": "sideways"})).is_err());
        assert!(FilterOrder::validate_and_parse(&json!({"direction": "asc"})).is_err());
        assert!(FilterOrder::validate_and_parse(&json!(12)).is_err());
    }

    #[test]
    fn empty_is_none() {
        assert!(FilterOrder::generate(&[]).is_none());
    }
}
