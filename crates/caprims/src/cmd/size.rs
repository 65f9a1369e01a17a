use caprims_dbr::{dbr_size_n, DbrType};
use serde::Serialize;

use crate::cmd::{Global, SizeArgs};
use crate::exit::{dbr_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct SizeOutput {
    dbr_type: DbrType,
    count: i64,
    size: usize,
}

pub fn run(args: SizeArgs, global: &Global) -> CliResult<i32> {
    let dbr_type: DbrType = args
        .dbr_type
        .parse()
        .map_err(|err| dbr_error("invalid type", err))?;
    let size =
        dbr_size_n(dbr_type.as_raw(), args.count).map_err(|err| dbr_error("size failed", err))?;
    let out = SizeOutput {
        dbr_type,
        count: args.count,
        size,
    };

    match global.format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_table(
            vec!["TYPE", "COUNT", "BYTES"],
            vec![vec![
                out.dbr_type.to_string(),
                out.count.to_string(),
                out.size.to_string(),
            ]],
        ),
        OutputFormat::Pretty => println!("{} x {}: {} bytes", out.dbr_type, out.count, out.size),
        OutputFormat::Raw => println!("{}", out.size),
    }
    Ok(SUCCESS)
}
