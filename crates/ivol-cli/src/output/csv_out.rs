use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io;

use super::{cell, flatten_row, record_arrays};

/// Write output as CSV to stdout.
///
/// Results with record arrays (chain points) are written one row per record;
/// everything else becomes a two-column `field,value` listing.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        Value::Object(map) => match map.get("result") {
            Some(Value::Object(result)) => {
                let arrays = record_arrays(result);
                match arrays.iter().find(|(name, _)| *name == "points").or(arrays.first()) {
                    Some((_, records)) => write_records(&mut wtr, records),
                    None => write_fields(&mut wtr, result),
                }
            }
            _ => write_fields(&mut wtr, map),
        },
        Value::Array(arr) => write_records(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([&cell(value)]);
        }
    }

    let _ = wtr.flush();
}

fn write_fields<W: io::Write>(wtr: &mut csv::Writer<W>, map: &Map<String, Value>) {
    let _ = wtr.write_record(["field", "value"]);
    for (key, val) in flatten_row(map) {
        let _ = wtr.write_record([key, val]);
    }
}

fn write_records<W: io::Write>(wtr: &mut csv::Writer<W>, arr: &[Value]) {
    let rows: Vec<Vec<(String, String)>> = arr
        .iter()
        .filter_map(Value::as_object)
        .map(flatten_row)
        .collect();

    // Union of columns in first-seen order; failed and filtered rows carry different status fields
    let mut seen = HashSet::new();
    let mut headers: Vec<String> = Vec::new();
    for row in &rows {
        for (k, _) in row {
            if seen.insert(k.clone()) {
                headers.push(k.clone());
            }
        }
    }
    if headers.is_empty() {
        return;
    }

    let _ = wtr.write_record(&headers);
    for row in &rows {
        let record: Vec<String> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(k, _)| k == h)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .collect();
        let _ = wtr.write_record(&record);
    }
}
