use serde::de::DeserializeOwned;
use std::io::{self, Read};

/// Deserialise piped stdin. JSON is tried first, then YAML.
/// Returns None if stdin is a TTY (interactive) or empty.
pub fn read_stdin<T: DeserializeOwned>() -> Result<Option<T>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    parse_piped(&buffer)
}

fn parse_piped<T: DeserializeOwned>(buffer: &str) -> Result<Option<T>, Box<dyn std::error::Error>> {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(Some(value)),
        Err(json_err) => serde_yaml::from_str(trimmed)
            .map(Some)
            .map_err(|_| format!("Failed to parse stdin as JSON: {}", json_err).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_blank_input_is_none() {
        assert!(parse_piped::<Value>("  \n").unwrap().is_none());
    }

    #[test]
    fn test_yaml_accepted_when_not_json() {
        let v: Value = parse_piped("spot_price: '100'\noption_type: put\n").unwrap().unwrap();
        assert_eq!(v["option_type"], "put");
    }

    #[test]
    fn test_garbage_reports_json_error() {
        let err = parse_piped::<Value>("{ not valid").unwrap_err();
        assert!(err.to_string().contains("stdin"));
    }
}
