use caprims_dbr::{ScalarKind, TypeDescriptor, CATALOG};

use crate::cmd::{Global, TypesArgs};
use crate::exit::{CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_json, print_table, OutputFormat};

pub fn run(args: TypesArgs, global: &Global) -> CliResult<i32> {
    let kind = args.kind.as_deref().map(parse_kind).transpose()?;
    let rows: Vec<&TypeDescriptor> = CATALOG
        .iter()
        .filter(|desc| kind.is_none_or(|kind| desc.kind == kind))
        .collect();

    match global.format {
        OutputFormat::Json => {
            for desc in rows {
                print_json(desc);
            }
        }
        OutputFormat::Table => print_table(
            vec!["ID", "NAME", "FAMILY", "KIND", "SIZE", "ELEMENT", "OFFSET"],
            rows.iter()
                .map(|desc| {
                    vec![
                        desc.dbr_type.as_raw().to_string(),
                        desc.dbr_type.to_string(),
                        format!("{:?}", desc.family).to_lowercase(),
                        format!("{:?}", desc.kind).to_lowercase(),
                        desc.header_size.to_string(),
                        desc.element_size.to_string(),
                        desc.value_offset.to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for desc in rows {
                println!("{:>2} {}", desc.dbr_type.as_raw(), desc.dbr_type);
            }
        }
    }
    Ok(SUCCESS)
}

fn parse_kind(input: &str) -> CliResult<ScalarKind> {
    ScalarKind::ALL
        .into_iter()
        .find(|kind| format!("{kind:?}").eq_ignore_ascii_case(input.trim()))
        .ok_or_else(|| CliError::new(USAGE, format!("unknown scalar kind: {input}")))
}
