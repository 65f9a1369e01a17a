use caprims_client::ContextConfig;
use caprims_dbr::FieldType;
use caprims_native::{AccessRights, ChannelState};
use serde::Serialize;

use crate::cmd::get::{connect_all, not_connected, report};
use crate::cmd::{Global, InfoArgs, Session};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ChannelInfo<'a> {
    pv: &'a str,
    state: ChannelState,
    field_type: FieldType,
    element_count: usize,
    host: Option<String>,
    access: AccessRights,
}

pub fn run(args: InfoArgs, global: &Global) -> CliResult<i32> {
    let session = Session::open(global, ContextConfig::default())?;
    let ctx = &session.ctx;
    let chids = connect_all(&session, &args.pvs)?;

    let mut code = SUCCESS;
    let mut rows = Vec::with_capacity(chids.len());
    for (pv, chid) in args.pvs.iter().zip(chids) {
        let Some(chid) = chid else {
            code = report(code, not_connected(pv));
            continue;
        };
        rows.push(ChannelInfo {
            pv,
            state: ctx.state(chid),
            field_type: ctx.field_type(chid),
            element_count: ctx.element_count(chid),
            host: ctx.host_name(chid),
            access: ctx.access_rights(chid),
        });
    }

    match global.format {
        OutputFormat::Json => {
            for row in &rows {
                print_json(row);
            }
        }
        OutputFormat::Table => print_table(
            vec!["PV", "STATE", "TYPE", "COUNT", "HOST", "ACCESS"],
            rows.iter()
                .map(|row| {
                    vec![
                        row.pv.to_string(),
                        row.state.name().to_string(),
                        row.field_type.to_string(),
                        row.element_count.to_string(),
                        row.host.clone().unwrap_or_default(),
                        access_text(row.access).to_string(),
                    ]
                })
                .collect(),
        ),
        OutputFormat::Pretty => {
            for row in &rows {
                println!("{}", row.pv);
                println!("    State:            {}", row.state.name());
                println!("    Host:             {}", row.host.as_deref().unwrap_or("-"));
                println!("    Access:           {}", access_text(row.access));
                println!("    Native data type: {}", row.field_type);
                println!("    Element count:    {}", row.element_count);
            }
        }
        OutputFormat::Raw => {
            for row in &rows {
                println!("{} {} {}", row.pv, row.field_type, row.element_count);
            }
        }
    }
    Ok(code)
}

fn access_text(access: AccessRights) -> &'static str {
    match (access.read, access.write) {
        (true, true) => "read, write",
        (true, false) => "read",
        (false, true) => "write",
        (false, false) => "none",
    }
}
