use std::io::{IsTerminal, Write};

use caprims_dbr::{DbrRecord, DbrType, Decoded, Value};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ValueOutput<'a> {
    pv: &'a str,
    dbr_type: DbrType,
    count: usize,
    value: &'a Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<&'a DbrRecord>,
}

/// Print one read result or subscription update.
pub fn print_value(pv: &str, dbr_type: DbrType, decoded: &Decoded, format: OutputFormat) {
    let value = decoded.value();
    let record = decoded.record();
    match format {
        OutputFormat::Json => print_json(&ValueOutput {
            pv,
            dbr_type,
            count: value.len(),
            value,
            record,
        }),
        OutputFormat::Table => {
            let mut header = vec!["PV", "TYPE", "COUNT", "VALUE"];
            let mut row = vec![
                pv.to_string(),
                dbr_type.to_string(),
                value.len().to_string(),
                value_text(value),
            ];
            if let Some(record) = record {
                header.extend(["SEVERITY", "STATUS", "UNITS"]);
                row.extend(alarm_columns(record));
            }
            print_table(header, vec![row]);
        }
        OutputFormat::Pretty => {
            let mut line = format!("{pv} {}", value_text(value));
            if let Some(record) = record {
                let [severity, status, units] = alarm_columns(record);
                if !units.is_empty() {
                    line.push(' ');
                    line.push_str(&units);
                }
                line.push_str(&format!(" {severity} {status}"));
                if let Some(stamp) = record.stamp {
                    line.push_str(&format!(" @{:.6}", stamp.unix_seconds()));
                }
            }
            println!("{line}");
        }
        OutputFormat::Raw => {
            print_raw(format!("{}\n", value_text(value)).as_bytes());
        }
    }
}

fn alarm_columns(record: &DbrRecord) -> [String; 3] {
    [
        record
            .alarm_severity()
            .map_or_else(|| record.severity.to_string(), |s| s.to_string()),
        record
            .alarm_condition()
            .map_or_else(|| record.status.to_string(), |c| c.to_string()),
        record.units.clone().unwrap_or_default(),
    ]
}

/// Elements separated by spaces, the way caget prints arrays.
pub fn value_text(value: &Value) -> String {
    value
        .to_scalars()
        .iter()
        .map(|scalar| scalar.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use caprims_dbr::{NumericArray, Scalar};

    #[test]
    fn arrays_print_space_separated() {
        let value = Value::Array(NumericArray::Long(vec![1, 2, 3]));
        assert_eq!(value_text(&value), "1 2 3");
        let value = Value::Scalar(Scalar::Text("Busy".into()));
        assert_eq!(value_text(&value), "Busy");
    }

    #[test]
    fn plain_values_serialize_without_record() {
        let value = Value::Scalar(Scalar::Double(12.5));
        let out = ValueOutput {
            pv: "catest",
            dbr_type: DbrType::Double,
            count: 1,
            value: &value,
            record: None,
        };
        let json: serde_json::Value = serde_json::to_value(&out).unwrap();
        assert_eq!(json["pv"], "catest");
        assert_eq!(json["dbr_type"], "DBR_DOUBLE");
        assert_eq!(json["value"], 12.5);
        assert!(json.get("record").is_none());
    }
}
