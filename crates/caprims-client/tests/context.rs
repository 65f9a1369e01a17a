use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use caprims_client::{
    get_and_wait, put_and_wait, search_and_wait, CaError, ChannelOptions, Context, ContextConfig,
    GetRequest, SubscribeRequest,
};
use caprims_dbr::{
    DbrType, DecodeOptions, FieldType, PutLengthPolicy, PutRequest, Scalar, Value,
};
use caprims_native::{
    AccessRights, ChannelState, Eca, EventMask, LoopbackServer, ProcessVariable,
};

const SHORT: Duration = Duration::from_millis(150);
const LONG: Duration = Duration::from_secs(2);

fn demo() -> (LoopbackServer, Context) {
    let server = LoopbackServer::with_demo_records();
    let ctx = Context::create(&server, ContextConfig::default()).unwrap();
    (server, ctx)
}

fn double(ctx: &Context, name: &str) -> f64 {
    let chid = search_and_wait(ctx, name, Some(LONG)).unwrap();
    let value = get_and_wait(ctx, chid, &GetRequest::default(), Some(LONG)).unwrap();
    ctx.clear_channel(chid).unwrap();
    value.value().as_f64().unwrap()
}

#[test]
fn double_write_reads_back_exactly() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let request = PutRequest::default().with_type(DbrType::Double).with_count(1);
    put_and_wait(&ctx, chid, 12.3, &request, Some(LONG)).unwrap();

    let read = GetRequest::default().with_type(DbrType::Double).with_count(1);
    let value = get_and_wait(&ctx, chid, &read, Some(LONG)).unwrap();
    assert_eq!(value.value(), &Value::Scalar(Scalar::Double(12.3)));
    ctx.destroy();
}

#[test]
fn short_array_write_is_zero_filled_on_read() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "cawave", Some(LONG)).unwrap();
    assert_eq!(ctx.element_count(chid), 20);
    ctx.put(chid, vec![1.0, 2.0, 3.0], &ctx.put_request()).unwrap();

    let read = GetRequest::default().with_type(DbrType::Double).with_count(20);
    let value = get_and_wait(&ctx, chid, &read, Some(LONG)).unwrap();
    let items = value.value().to_scalars();
    assert_eq!(items.len(), 20);
    assert_eq!(
        &items[..3],
        &[Scalar::Double(1.0), Scalar::Double(2.0), Scalar::Double(3.0)]
    );
    assert!(items[3..].iter().all(|item| *item == Scalar::Double(0.0)));
    ctx.destroy();
}

#[test]
fn state_name_write_selects_enum_index() {
    let (server, ctx) = demo();
    let chid = search_and_wait(&ctx, "cabo", Some(LONG)).unwrap();
    assert_eq!(ctx.field_type(chid), FieldType::Enum);
    put_and_wait(&ctx, chid, "Busy", &PutRequest::default(), Some(LONG)).unwrap();

    let read = GetRequest::default().with_type(DbrType::Enum);
    let value = get_and_wait(&ctx, chid, &read, Some(LONG)).unwrap();
    assert_eq!(value.value(), &Value::Scalar(Scalar::Enum(1)));
    assert_eq!(server.values("cabo"), Some(vec![Scalar::Enum(1)]));
    ctx.destroy();
}

#[test]
fn control_record_carries_metadata() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let read = GetRequest::default().with_type(DbrType::CtrlDouble);
    let decoded = get_and_wait(&ctx, chid, &read, Some(LONG)).unwrap();
    let record = decoded.record().unwrap();
    assert_eq!(record.units.as_deref(), Some("mm"));
    assert_eq!(record.precision, Some(4));
    assert_eq!(record.value, Value::Scalar(Scalar::Double(1.0)));
    ctx.destroy();
}

#[test]
fn over_long_write_follows_policy() {
    let (server, ctx) = demo();
    let chid = search_and_wait(&ctx, "cawavel", Some(LONG)).unwrap();
    let values: Vec<i32> = (1..=25).collect();

    let reject = PutRequest::default().with_policy(PutLengthPolicy::Reject);
    let err = ctx.put(chid, values.clone(), &reject).unwrap_err();
    assert_eq!(err.status(), Eca::BADCOUNT);

    put_and_wait(&ctx, chid, values, &ctx.put_request(), Some(LONG)).unwrap();
    let stored = server.values("cawavel").unwrap();
    assert_eq!(stored.len(), 20);
    assert_eq!(stored[19], Scalar::Long(20));
    ctx.destroy();
}

#[test]
fn buffered_value_is_not_ready_before_pend_io() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "calong", Some(LONG)).unwrap();
    let pending = ctx.get(chid, &GetRequest::default()).unwrap();
    assert_eq!(pending.dbr_type(), DbrType::Long);
    assert_eq!(pending.value().unwrap_err(), CaError::NotReady);
    ctx.pend_io(LONG).unwrap();
    assert_eq!(pending.value().unwrap().value().as_f64(), Some(0.0));
    ctx.destroy();
}

#[test]
fn native_type_of_unconnected_channel_is_bad_type() {
    let (_server, ctx) = demo();
    let chid = ctx.create_channel("nosuchpv", ChannelOptions::default()).unwrap();
    let err = ctx.get(chid, &GetRequest::default()).unwrap_err();
    assert_eq!(err, CaError::Status(Eca::BADTYPE));
    let err = ctx
        .put(chid, 1.0, &PutRequest::default())
        .unwrap_err();
    assert_eq!(err.status(), Eca::BADTYPE);
    assert_eq!(ctx.state(chid), ChannelState::NeverConnected);
    assert_eq!(ctx.pend_io(SHORT), Err(CaError::Status(Eca::TIMEOUT)));
    ctx.destroy();
}

#[test]
fn search_timeout_clears_the_channel() {
    let (_server, ctx) = demo();
    let err = search_and_wait(&ctx, "nosuchpv", Some(SHORT)).unwrap_err();
    assert!(err.is_timeout());
    assert!(ctx.registry().is_empty());
    ctx.destroy();
}

#[test]
fn cleared_channel_rejects_requests_without_native_call() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    ctx.clear_channel(chid).unwrap();
    assert_eq!(
        ctx.get_callback(chid, &GetRequest::default(), |_| {}),
        Err(CaError::BadChannel)
    );
    assert_eq!(
        ctx.put(chid, 1.0, &PutRequest::default()),
        Err(CaError::BadChannel)
    );
    assert_eq!(ctx.clear_channel(chid), Err(CaError::BadChannel));
    ctx.destroy();
}

#[test]
fn get_callback_delivers_during_pend_event() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "castr", Some(LONG)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    ctx.get_callback(chid, &GetRequest::default(), move |result| {
        sink.lock().unwrap().push(result.map(|decoded| decoded.into_value()));
    })
    .unwrap();
    assert!(seen.lock().unwrap().is_empty());
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Ok(Value::Scalar(Scalar::Text("hello".into())))]
    );
    assert_eq!(ctx.registry().pending_count(chid), 0);
    ctx.destroy();
}

#[test]
fn subscription_follows_updates_until_cleared() {
    let (server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let request = SubscribeRequest::default()
        .with_type(DbrType::TimeDouble)
        .with_mask(EventMask::VALUE);
    let sub = ctx
        .create_subscription(chid, &request, move |result| {
            let value = result.unwrap().value().as_f64().unwrap();
            sink.lock().unwrap().push(value);
        })
        .unwrap();
    ctx.pend_event(SHORT).unwrap();

    server.post("catest", vec![Scalar::Double(2.5)]).unwrap();
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(*seen.lock().unwrap(), vec![1.0, 2.5]);

    ctx.clear_subscription(sub).unwrap();
    assert_eq!(ctx.clear_subscription(sub), Err(CaError::BadSubscription));
    server.post("catest", vec![Scalar::Double(3.5)]).unwrap();
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(seen.lock().unwrap().len(), 2);
    ctx.destroy();
}

#[test]
fn clearing_a_channel_cascades_its_subscriptions() {
    let (server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let hits = Arc::clone(&hits);
        ctx.create_subscription(chid, &SubscribeRequest::default(), move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    assert_eq!(ctx.registry().subscription_count(chid), 3);
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    ctx.clear_channel(chid).unwrap();
    assert!(!ctx.registry().contains(chid));
    server.post("catest", vec![Scalar::Double(7.0)]).unwrap();
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    ctx.destroy();
}

#[test]
fn connection_callback_tracks_availability() {
    let (server, ctx) = demo();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let options = ChannelOptions::default()
        .on_connection(move |event| sink.lock().unwrap().push(event.connected()));
    let chid = ctx.create_channel("catest", options).unwrap();
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(ctx.state(chid), ChannelState::Connected);

    server.set_online("catest", false);
    ctx.pend_event(SHORT).unwrap();
    server.set_online("catest", true);
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(*events.lock().unwrap(), vec![true, false, true]);

    ctx.change_connection_event(chid, None).unwrap();
    server.set_online("catest", false);
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(events.lock().unwrap().len(), 3);
    ctx.destroy();
}

#[test]
fn access_rights_callback_sees_changes() {
    let (server, ctx) = demo();
    let chid = search_and_wait(&ctx, "calong", Some(LONG)).unwrap();
    assert!(ctx.read_access(chid) && ctx.write_access(chid));

    let rights = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&rights);
    ctx.replace_access_rights_event(
        chid,
        Some(Arc::new(move |event| sink.lock().unwrap().push(event.rights))),
    )
    .unwrap();
    server.set_access("calong", AccessRights::READ_ONLY);
    ctx.pend_event(SHORT).unwrap();
    assert_eq!(
        *rights.lock().unwrap(),
        vec![AccessRights::READ_WRITE, AccessRights::READ_ONLY]
    );

    let err = put_and_wait(&ctx, chid, 5, &PutRequest::default(), Some(LONG)).unwrap_err();
    assert_eq!(err.status(), Eca::NOWTACCESS);
    ctx.destroy();
}

#[test]
fn failed_put_reaches_exception_handler() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "cabo", Some(LONG)).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    ctx.add_exception_event(move |event| {
        let _ = tx.lock().unwrap().send(event.clone());
    });
    let request = PutRequest::default().with_type(DbrType::Short);
    ctx.put(chid, 7, &request).unwrap();
    ctx.pend_event(SHORT).unwrap();

    let event = rx.try_recv().unwrap();
    assert_eq!(event.status, Eca::PUTFAIL);
    assert_eq!(event.context, "cabo");
    assert_eq!(event.dbr_type, Some(DbrType::Short));
    ctx.destroy();
}

#[test]
fn sync_group_times_out_then_resets_for_a_new_round() {
    let (server, ctx) = demo();
    let wave = search_and_wait(&ctx, "cawaveh", Some(LONG)).unwrap();
    let scalar = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let groups = ctx.sync_groups();
    let gid = groups.create().unwrap();

    server.set_responsive("catest", false);
    let stale = groups
        .attach_get(gid, scalar, &GetRequest::default())
        .unwrap();
    groups
        .attach_put(gid, wave, vec![4, 5, 6], &PutRequest::default())
        .unwrap();
    assert_eq!(
        groups.block(gid, SHORT),
        Err(CaError::Status(Eca::TIMEOUT))
    );
    assert_eq!(groups.test(gid), Ok(Eca::IOINPROGRESS));
    assert_eq!(stale.value().unwrap_err(), CaError::NotReady);

    groups.reset(gid).unwrap();
    assert_eq!(groups.test(gid), Ok(Eca::IODONE));

    let wave_value = groups
        .attach_get(gid, wave, &GetRequest::default().with_count(3))
        .unwrap();
    groups.block(gid, LONG).unwrap();
    assert_eq!(
        wave_value.value().unwrap().value().to_scalars(),
        vec![Scalar::Short(4), Scalar::Short(5), Scalar::Short(6)]
    );
    assert!(!stale.is_ready());

    groups.delete(gid).unwrap();
    assert_eq!(groups.block(gid, SHORT), Err(CaError::BadSyncGroup));
    assert_eq!(
        groups.attach_get(gid, wave, &GetRequest::default()).unwrap_err(),
        CaError::BadSyncGroup
    );
    server.set_responsive("catest", true);
    ctx.destroy();
}

#[test]
fn numeric_array_decode_option_is_respected() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "cawavef", Some(LONG)).unwrap();
    ctx.put(chid, vec![0.5, 1.5], &PutRequest::default()).unwrap();
    let read = GetRequest::default()
        .with_count(2)
        .with_decode(DecodeOptions { numeric_array: true });
    let value = get_and_wait(&ctx, chid, &read, Some(LONG)).unwrap();
    assert!(matches!(value.value(), Value::Array(_)));
    assert_eq!(value.value().element(1), Some(Scalar::Float(1.5)));
    ctx.destroy();
}

#[test]
fn destroyed_context_rejects_everything() {
    let (_server, ctx) = demo();
    let chid = search_and_wait(&ctx, "catest", Some(LONG)).unwrap();
    let clone = ctx.clone();
    ctx.destroy();
    assert!(ctx.registry().is_empty());
    assert_eq!(
        clone.get(chid, &GetRequest::default()).unwrap_err(),
        CaError::NotAttached
    );
    assert_eq!(clone.pend_io(SHORT), Err(CaError::NotAttached));
}

#[test]
fn preemptive_context_serves_other_threads() {
    let server = LoopbackServer::with_demo_records();
    server.add_record(ProcessVariable::waveform("counter", caprims_dbr::ScalarKind::Long, 8));
    let config = ContextConfig::default().with_preemptive(true);
    let ctx = Context::create(&server, config).unwrap();
    let chid = search_and_wait(&ctx, "counter", Some(LONG)).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                ctx.attach().unwrap();
                assert_eq!(ctx.attach(), Err(CaError::IsAttached));
                let request = PutRequest::default().with_count(1);
                put_and_wait(&ctx, chid, n, &request, Some(LONG)).unwrap();
                ctx.detach().unwrap();
                assert_eq!(ctx.detach(), Err(CaError::NotAttached));
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let value = get_and_wait(&ctx, chid, &GetRequest::default().with_count(1), Some(LONG)).unwrap();
    let last = value.value().as_f64().unwrap();
    assert!((0.0..4.0).contains(&last));
    ctx.destroy();
}

#[test]
fn callbacks_run_attached_on_the_dispatch_thread() {
    let server = LoopbackServer::with_demo_records();
    let config = ContextConfig::default().with_preemptive(true);
    let ctx = Context::create(&server, config).unwrap();
    let chid = search_and_wait(&ctx, "calong", Some(LONG)).unwrap();

    let (tx, rx) = mpsc::channel();
    let inner = ctx.clone();
    ctx.get_callback(chid, &GetRequest::default(), move |result| {
        assert!(result.is_ok());
        let attached = inner.is_attached();
        let put = inner.put(chid, 42, &PutRequest::default());
        let _ = tx.send((attached, put));
    })
    .unwrap();
    ctx.flush_io().unwrap();

    let (attached, put) = rx.recv_timeout(LONG).unwrap();
    assert!(attached);
    assert_eq!(put, Ok(()));
    assert_eq!(double(&ctx, "calong"), 42.0);
    ctx.destroy();
}
