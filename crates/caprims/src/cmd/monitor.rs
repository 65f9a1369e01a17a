use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use caprims_client::{CaError, ContextConfig, SubscribeRequest};
use caprims_dbr::{DbrType, Decoded, Family};

use crate::cmd::get::{connect_all, not_connected, report};
use crate::cmd::{parse_timeout, Global, MonitorArgs, Session};
use crate::exit::{ca_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::print_value;

/// Slice of `pend_event` between checks of the stop conditions.
const TICK: Duration = Duration::from_millis(50);

struct Update {
    pv: Arc<str>,
    dbr_type: DbrType,
    result: Result<Decoded, CaError>,
}

pub fn run(args: MonitorArgs, global: &Global) -> CliResult<i32> {
    let deadline = args
        .duration
        .as_deref()
        .map(parse_timeout)
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut config = ContextConfig::default();
    if let Some(mask) = args.mask {
        config = config.with_subscription_mask(mask);
    }
    let session = Session::open(global, config)?;
    let ctx = &session.ctx;
    let chids = connect_all(&session, &args.pvs)?;

    let (tx, rx) = mpsc::channel::<Update>();
    let mut code = SUCCESS;
    let mut active = 0usize;
    for (pv, chid) in args.pvs.iter().zip(chids) {
        let Some(chid) = chid else {
            code = report(code, not_connected(pv));
            continue;
        };
        let Some(dbr_type) = args
            .dbr_type
            .or_else(|| ctx.field_type(chid).promote(Family::Time))
        else {
            code = report(code, not_connected(pv));
            continue;
        };
        let request = SubscribeRequest::default().with_type(dbr_type);
        let name: Arc<str> = Arc::from(pv.as_str());
        let tx = tx.clone();
        let subscribed = ctx.create_subscription(chid, &request, move |result| {
            let _ = tx.send(Update {
                pv: Arc::clone(&name),
                dbr_type,
                result,
            });
        });
        match subscribed {
            Ok(_) => active += 1,
            Err(err) => code = report(code, ca_error(pv, err)),
        }
    }
    if active == 0 {
        return Ok(code);
    }
    ctx.flush_io().map_err(|err| ca_error("flush failed", err))?;

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        ctx.pend_event(TICK)
            .map_err(|err| ca_error("pend failed", err))?;
        while let Ok(update) = rx.try_recv() {
            match update.result {
                Ok(decoded) => {
                    print_value(&update.pv, update.dbr_type, &decoded, global.format);
                    printed = printed.saturating_add(1);
                }
                Err(err) => code = report(code, ca_error(&update.pv, err)),
            }
            if args.count.is_some_and(|count| printed >= count) {
                return Ok(code);
            }
        }
    }

    Ok(code)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
