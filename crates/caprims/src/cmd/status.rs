use caprims_native::{CaSeverity, Eca};
use serde::Serialize;

use crate::cmd::{Global, StatusArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct StatusOutput {
    code: Eca,
    name: &'static str,
    message: &'static str,
    msg_no: i32,
    severity: CaSeverity,
    success: bool,
}

impl From<Eca> for StatusOutput {
    fn from(code: Eca) -> Self {
        Self {
            code,
            name: code.name(),
            message: code.message(),
            msg_no: code.msg_no(),
            severity: code.severity(),
            success: code.is_success(),
        }
    }
}

pub fn run(args: StatusArgs, global: &Global) -> CliResult<i32> {
    let rows: Vec<StatusOutput> = args
        .codes
        .into_iter()
        .map(|code| StatusOutput::from(Eca::from_raw(code)))
        .collect();

    match global.format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => print_table(
            vec!["CODE", "NAME", "SEVERITY", "MESSAGE"],
            rows.iter()
                .map(|row| {
                    vec![
                        row.code.code().to_string(),
                        row.name.to_string(),
                        format!("{:?}", row.severity).to_lowercase(),
                        row.message.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for row in &rows {
                println!("{}", row.code);
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{}", row.name);
            }
        }
    }
    Ok(SUCCESS)
}
