use caprims_client::{ChannelOptions, ContextConfig, GetRequest, PendingValue};
use caprims_dbr::DecodeOptions;
use caprims_native::{ChanId, ChannelState};
use tracing::debug;

use crate::cmd::{GetArgs, Global, Session};
use crate::exit::{ca_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::print_value;

/// Channels of one batch; `None` until connected.
pub(crate) fn connect_all(session: &Session, pvs: &[String]) -> CliResult<Vec<Option<ChanId>>> {
    let ctx = &session.ctx;
    let mut chids = Vec::with_capacity(pvs.len());
    for pv in pvs {
        let chid = ctx
            .create_channel(pv, ChannelOptions::default())
            .map_err(|err| ca_error(pv, err))?;
        chids.push(chid);
    }
    ctx.flush_io().map_err(|err| ca_error("flush failed", err))?;
    if let Err(err) = ctx.pend_io(ctx.config().pend_timeout) {
        debug!(error = %err, "not every channel connected");
    }
    Ok(chids
        .into_iter()
        .map(|chid| (ctx.state(chid) == ChannelState::Connected).then_some(chid))
        .collect())
}

pub(crate) fn not_connected(pv: &str) -> CliError {
    CliError::new(TIMEOUT, format!("{pv}: channel connect timed out"))
}

pub fn run(args: GetArgs, global: &Global) -> CliResult<i32> {
    let config = ContextConfig::default().with_decode(DecodeOptions {
        numeric_array: args.numeric_array,
    });
    let session = Session::open(global, config)?;
    let ctx = &session.ctx;
    let chids = connect_all(&session, &args.pvs)?;

    let mut request = GetRequest::default();
    if let Some(dbr_type) = args.dbr_type {
        request = request.with_type(dbr_type);
    }
    if let Some(count) = args.count {
        request = request.with_count(count);
    }

    let mut code = SUCCESS;
    let mut pending: Vec<(&str, PendingValue)> = Vec::new();
    for (pv, chid) in args.pvs.iter().zip(chids) {
        let Some(chid) = chid else {
            code = report(code, not_connected(pv));
            continue;
        };
        match ctx.get(chid, &request) {
            Ok(value) => pending.push((pv.as_str(), value)),
            Err(err) => code = report(code, ca_error(pv, err)),
        }
    }
    if pending.is_empty() {
        return Ok(code);
    }

    ctx.flush_io().map_err(|err| ca_error("flush failed", err))?;
    if let Err(err) = ctx.pend_io(ctx.config().pend_timeout) {
        debug!(error = %err, "not every read completed");
    }
    for (pv, value) in pending {
        match value.value() {
            Ok(decoded) => print_value(pv, value.dbr_type(), &decoded, global.format),
            Err(err) => code = report(code, ca_error(pv, err)),
        }
    }
    Ok(code)
}

/// Print a per-channel failure and keep the first failure's exit code.
pub(crate) fn report(code: i32, err: CliError) -> i32 {
    eprintln!("error: {err}");
    if code == SUCCESS {
        err.code
    } else {
        code
    }
}
