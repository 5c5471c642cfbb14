use serde_json::Value;

use super::cell;

/// Headline field per command, in priority order.
const PRIORITY_KEYS: [&str; 5] = ["implied_vol", "price", "holds", "solved", "deviation"];

/// Print just the key answer value from the output.
pub fn print_minimal(value: &Value) {
    println!("{}", headline(value));
}

fn headline(value: &Value) -> String {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Value::Object(map) = result_obj {
        for key in &PRIORITY_KEYS {
            if let Some(val) = map.get(*key) {
                if !val.is_null() {
                    return cell(val);
                }
            }
        }
        if let Some((key, val)) = map.iter().next() {
            return format!("{}: {}", key, cell(val));
        }
    }

    cell(result_obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_implied_vol_wins_over_price_error() {
        let v = json!({"result": {"price_error": "0.0000001", "implied_vol": "0.2000", "iterations": 3}});
        assert_eq!(headline(&v), "0.2000");
    }

    #[test]
    fn test_falls_back_to_first_field() {
        let v = json!({"result": {"alpha": 1}});
        assert_eq!(headline(&v), "alpha: 1");
    }
}
