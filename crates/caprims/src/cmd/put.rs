use caprims_client::{get_and_wait, put_and_wait, search_and_wait, ContextConfig, GetRequest};
use caprims_dbr::{DbrType, Family, PutLengthPolicy, PutValue, Scalar};
use tracing::debug;

use crate::cmd::{Global, PutArgs, Session};
use crate::exit::{ca_error, CliResult, SUCCESS};
use crate::output::print_value;

/// Command-line words as a write value; the codec parses text per field type.
fn put_value(values: Vec<String>) -> PutValue {
    let mut scalars: Vec<Scalar> = values.into_iter().map(Scalar::Text).collect();
    if scalars.len() == 1 {
        PutValue::Scalar(scalars.remove(0))
    } else {
        PutValue::Sequence(scalars)
    }
}

pub fn run(args: PutArgs, global: &Global) -> CliResult<i32> {
    let policy = if args.reject_long {
        PutLengthPolicy::Reject
    } else {
        PutLengthPolicy::Truncate
    };
    let session = Session::open(
        global,
        ContextConfig::default().with_put_length_policy(policy),
    )?;
    let ctx = &session.ctx;

    let chid = search_and_wait(ctx, &args.pv, None).map_err(|err| ca_error(&args.pv, err))?;
    let mut request = ctx.put_request();
    if let Some(dbr_type) = args.dbr_type {
        request = request.with_type(dbr_type);
    }
    let value = put_value(args.values);
    debug!(pv = %args.pv, elements = value.len(), "writing");
    put_and_wait(ctx, chid, value, &request, None).map_err(|err| ca_error(&args.pv, err))?;

    let request = GetRequest::default();
    let decoded =
        get_and_wait(ctx, chid, &request, None).map_err(|err| ca_error(&args.pv, err))?;
    let dbr_type = ctx
        .field_type(chid)
        .promote(Family::Plain)
        .unwrap_or(DbrType::String);
    print_value(&args.pv, dbr_type, &decoded, global.format);
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_word_is_a_scalar() {
        assert_eq!(
            put_value(vec!["12.5".into()]),
            PutValue::Scalar(Scalar::Text("12.5".into()))
        );
        assert_eq!(put_value(vec!["1".into(), "2".into()]).len(), 2);
    }
}
