pub mod csv_out;
pub mod json;
pub mod minimal;
pub mod table;

use crate::OutputFormat;
use serde_json::Value;

/// Dispatch output to the appropriate formatter.
pub fn format_output(format: &OutputFormat, value: &Value) {
    match format {
        OutputFormat::Json => json::print_json(value),
        OutputFormat::Table => table::print_table(value),
        OutputFormat::Csv => csv_out::print_csv(value),
        OutputFormat::Minimal => minimal::print_minimal(value),
    }
}

/// Render a scalar cell. Nested values fall back to compact JSON.
pub(crate) fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Flatten one level of nesting into `parent.child` columns so rows such as
/// chain points (with a tagged `status`) fit a flat grid.
pub(crate) fn flatten_row(map: &serde_json::Map<String, Value>) -> Vec<(String, String)> {
    let mut row = Vec::with_capacity(map.len());
    for (key, val) in map {
        match val {
            Value::Object(inner) => {
                for (sub, v) in inner {
                    let name = if sub == key {
                        key.clone()
                    } else {
                        format!("{key}.{sub}")
                    };
                    row.push((name, cell(v)));
                }
            }
            _ => row.push((key.clone(), cell(val))),
        }
    }
    row
}

/// Array-of-object fields of a result, e.g. chain points.
pub(crate) fn record_arrays(
    result: &serde_json::Map<String, Value>,
) -> Vec<(&str, &[Value])> {
    result
        .iter()
        .filter_map(|(k, v)| match v {
            Value::Array(items) if items.first().is_some_and(Value::is_object) => {
                Some((k.as_str(), items.as_slice()))
            }
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_row_expands_tagged_status() {
        let v = json!({"strike": "100", "status": {"status": "filtered", "reason": "no usable price"}});
        let row = flatten_row(v.as_object().unwrap());
        assert!(row.contains(&("status".to_string(), "filtered".to_string())));
        assert!(row.contains(&("status.reason".to_string(), "no usable price".to_string())));
    }

    #[test]
    fn test_record_arrays_skips_scalars() {
        let v = json!({"solved": 2, "points": [{"strike": "95"}], "empty": []});
        let arrays = record_arrays(v.as_object().unwrap());
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].0, "points");
    }
}
