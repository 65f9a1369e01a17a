use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use caprims_dbr::{decode, encode_elements, DbrType, DecodeOptions, FieldType, Scalar, ScalarKind};
use caprims_native::{
    AccessRights, CaOp, ChanId, ChannelState, Eca, EventArgs, EventId, EventMask, EventSink,
    ExceptionArgs, LoopbackServer, NativeBackend, NativeClient, Priority, ProcessVariable,
    RequestKey, ValueBuffer,
};

const SHORT: Duration = Duration::from_millis(150);
const LONG: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
struct Recorded {
    key: RequestKey,
    op: CaOp,
    status: Eca,
    dbr_type: i64,
    count: usize,
    data: Option<Vec<u8>>,
}

impl Recorded {
    fn value(&self) -> Scalar {
        let dbr_type = DbrType::from_raw(self.dbr_type).unwrap();
        let data = self.data.as_ref().unwrap();
        let decoded = decode(dbr_type, self.count, data, &DecodeOptions::default()).unwrap();
        decoded.value().element(0).unwrap()
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Recorded>>,
    connections: Mutex<Vec<(ChanId, CaOp)>>,
    rights: Mutex<Vec<(ChanId, AccessRights)>>,
    exceptions: Mutex<Vec<Eca>>,
}

impl EventSink for Recorder {
    fn on_event(&self, event: EventArgs<'_>) {
        self.events.lock().unwrap().push(Recorded {
            key: event.key,
            op: event.op,
            status: event.status,
            dbr_type: event.dbr_type,
            count: event.count,
            data: event.data.map(<[u8]>::to_vec),
        });
    }

    fn on_connection(&self, chid: ChanId, op: CaOp) {
        self.connections.lock().unwrap().push((chid, op));
    }

    fn on_access_rights(&self, chid: ChanId, rights: AccessRights) {
        self.rights.lock().unwrap().push((chid, rights));
    }

    fn on_exception(&self, exception: ExceptionArgs<'_>) {
        self.exceptions.lock().unwrap().push(exception.status);
    }
}

fn context(server: &LoopbackServer, preemptive: bool) -> (Arc<dyn NativeClient>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let ctx = server.create_context(preemptive, recorder.clone()).unwrap();
    (ctx, recorder)
}

fn connect(ctx: &Arc<dyn NativeClient>, name: &str) -> ChanId {
    let chid = ctx.create_channel(name, Priority::DEFAULT, false).unwrap();
    assert_eq!(ctx.pend_io(LONG), Eca::NORMAL);
    chid
}

fn double(v: f64) -> Vec<u8> {
    encode_elements(DbrType::Double, &[Scalar::Double(v)], 1)
        .unwrap()
        .to_vec()
}

#[test]
fn buffered_get_completes_on_pend_io() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, _) = context(&server, false);
    let chid = connect(&ctx, "catest");
    assert_eq!(ctx.field_type(chid), FieldType::Double);
    assert_eq!(ctx.element_count(chid), 1);
    assert_eq!(ctx.host_name(chid).as_deref(), Some("localhost:5064"));

    let buf = ValueBuffer::new(DbrType::TimeDouble, 1);
    assert_eq!(ctx.array_get(chid, DbrType::TimeDouble, 1, &buf), Eca::NORMAL);
    assert!(!buf.is_filled());
    assert_eq!(ctx.test_io(), Eca::IOINPROGRESS);
    assert_eq!(ctx.pend_io(LONG), Eca::NORMAL);
    assert_eq!(ctx.test_io(), Eca::IODONE);

    let decoded = buf.decode(&DecodeOptions::default()).unwrap();
    assert_eq!(decoded.value().as_f64(), Some(1.0));
    assert!(decoded.record().unwrap().stamp.is_some());
}

#[test]
fn unknown_channel_times_out_and_abandons_io() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, _) = context(&server, false);
    let chid = ctx
        .create_channel("no:such:pv", Priority::DEFAULT, false)
        .unwrap();
    assert_eq!(ctx.pend_io(SHORT), Eca::TIMEOUT);
    assert_eq!(ctx.test_io(), Eca::IODONE);
    assert_eq!(ctx.state(chid), ChannelState::NeverConnected);
    assert_eq!(ctx.field_type(chid), FieldType::NotConnected);

    let buf = ValueBuffer::new(DbrType::Double, 1);
    assert_eq!(ctx.array_get(chid, DbrType::Double, 1, &buf), Eca::DISCONN);
}

#[test]
fn connection_events_follow_record_availability() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, false);
    let chid = ctx.create_channel("catest", Priority::DEFAULT, true).unwrap();
    assert_eq!(ctx.test_io(), Eca::IODONE);

    assert_eq!(ctx.pend_event(SHORT), Eca::TIMEOUT);
    assert_eq!(
        recorder.connections.lock().unwrap().as_slice(),
        &[(chid, CaOp::ConnUp)]
    );

    server.set_online("catest", false);
    ctx.pend_event(SHORT);
    assert_eq!(ctx.state(chid), ChannelState::PreviouslyConnected);
    assert_eq!(
        recorder.connections.lock().unwrap().last(),
        Some(&(chid, CaOp::ConnDown))
    );

    server.set_online("catest", true);
    ctx.pend_event(SHORT);
    assert_eq!(ctx.state(chid), ChannelState::Connected);
    assert_eq!(recorder.connections.lock().unwrap().len(), 3);
}

#[test]
fn put_callback_and_monitor_updates_are_delivered_in_order() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, false);
    let chid = connect(&ctx, "catest");

    let monitor = RequestKey(7);
    let put = RequestKey(8);
    ctx.create_subscription(chid, DbrType::Double, 1, EventMask::default(), monitor)
        .unwrap();
    assert_eq!(
        ctx.array_put_callback(chid, DbrType::Double, 1, &double(5.0), put),
        Eca::NORMAL
    );
    ctx.pend_event(SHORT);

    let events = recorder.events.lock().unwrap().clone();
    let keys: Vec<u64> = events.iter().map(|e| e.key.0).collect();
    assert_eq!(keys, vec![7, 8, 7]);
    assert_eq!(events[0].value(), Scalar::Double(1.0));
    assert_eq!(events[1].op, CaOp::Put);
    assert_eq!(events[1].status, Eca::NORMAL);
    assert!(events[1].data.is_none());
    assert_eq!(events[2].op, CaOp::AddEvent);
    assert_eq!(events[2].value(), Scalar::Double(5.0));
    assert_eq!(server.values("catest"), Some(vec![Scalar::Double(5.0)]));
}

#[test]
fn alarm_only_subscription_ignores_value_changes_inside_limits() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, false);
    let chid = connect(&ctx, "catest");
    ctx.create_subscription(chid, DbrType::StsDouble, 1, EventMask::ALARM, RequestKey(1))
        .unwrap();
    ctx.array_put(chid, DbrType::Double, 1, &double(2.0));
    ctx.pend_event(SHORT);
    assert_eq!(recorder.events.lock().unwrap().len(), 1);

    ctx.array_put(chid, DbrType::Double, 1, &double(15.0));
    ctx.pend_event(SHORT);
    assert_eq!(recorder.events.lock().unwrap().len(), 2);
}

#[test]
fn sync_group_blocks_until_members_complete() {
    let server = LoopbackServer::with_demo_records();
    server.add_record(ProcessVariable::scalar("stuck", 0.0));
    server.set_responsive("stuck", false);
    let (ctx, _) = context(&server, false);
    let good = connect(&ctx, "catest");
    let stuck = connect(&ctx, "stuck");

    let gid = ctx.sg_create().unwrap();
    let buf = ValueBuffer::new(DbrType::Double, 1);
    assert_eq!(ctx.sg_array_get(gid, good, DbrType::Double, 1, &buf), Eca::NORMAL);
    assert_eq!(ctx.sg_test(gid), Eca::IOINPROGRESS);
    assert_eq!(ctx.sg_block(gid, LONG), Eca::NORMAL);
    assert_eq!(ctx.sg_test(gid), Eca::IODONE);

    let late = ValueBuffer::new(DbrType::Double, 1);
    assert_eq!(ctx.sg_array_get(gid, stuck, DbrType::Double, 1, &late), Eca::NORMAL);
    assert_eq!(ctx.sg_block(gid, SHORT), Eca::TIMEOUT);
    assert_eq!(ctx.sg_test(gid), Eca::IOINPROGRESS);
    assert_eq!(ctx.sg_reset(gid), Eca::NORMAL);
    assert_eq!(ctx.sg_test(gid), Eca::IODONE);

    assert_eq!(ctx.sg_delete(gid), Eca::NORMAL);
    assert_eq!(ctx.sg_block(gid, SHORT), Eca::BADSYNCGRP);
    assert_eq!(ctx.sg_delete(gid), Eca::BADSYNCGRP);
}

#[test]
fn stalled_request_completes_once_record_responds() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, false);
    let chid = connect(&ctx, "catest");
    server.set_responsive("catest", false);

    ctx.array_get_callback(chid, DbrType::Double, 1, RequestKey(3));
    ctx.pend_event(SHORT);
    assert!(recorder.events.lock().unwrap().is_empty());

    server.set_responsive("catest", true);
    ctx.pend_event(SHORT);
    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].value(), Scalar::Double(1.0));
}

#[test]
fn failed_put_without_callback_raises_exception() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, false);
    let chid = connect(&ctx, "cabo");
    assert_eq!(ctx.set_exception_events(true), Eca::NORMAL);

    let idle = encode_elements(DbrType::String, &[Scalar::Text("Idle".into())], 1).unwrap();
    assert_eq!(ctx.array_put(chid, DbrType::String, 1, &idle), Eca::NORMAL);
    ctx.pend_event(SHORT);
    assert_eq!(recorder.exceptions.lock().unwrap().as_slice(), &[Eca::PUTFAIL]);
}

#[test]
fn access_rights_and_identifiers_are_checked() {
    let server = LoopbackServer::new();
    server.add_record(ProcessVariable::scalar("ro", 1.0).with_access(AccessRights::READ_ONLY));
    let (ctx, recorder) = context(&server, false);
    let chid = connect(&ctx, "ro");

    assert_eq!(ctx.access_rights(chid), AccessRights::READ_ONLY);
    assert_eq!(ctx.array_put(chid, DbrType::Double, 1, &double(2.0)), Eca::NOWTACCESS);
    assert_eq!(ctx.array_put(chid, DbrType::CtrlDouble, 1, &double(2.0)), Eca::BADTYPE);

    ctx.set_access_rights_events(chid, true);
    server.set_access("ro", AccessRights::NONE);
    ctx.pend_event(SHORT);
    assert_eq!(
        recorder.rights.lock().unwrap().as_slice(),
        &[(chid, AccessRights::READ_ONLY), (chid, AccessRights::NONE)]
    );

    assert_eq!(ctx.clear_channel(ChanId(9_999)), Eca::BADCHID);
    assert_eq!(ctx.clear_subscription(EventId(9_999)), Eca::BADMONID);
    assert_eq!(
        ctx.create_channel("", Priority::DEFAULT, false),
        Err(Eca::EMPTYSTR)
    );
}

#[test]
fn waveform_write_sets_element_count() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, _) = context(&server, false);
    let chid = connect(&ctx, "cawavel");
    assert_eq!(ctx.field_type(chid).kind(), Some(ScalarKind::Long));

    let data = encode_elements(
        DbrType::Long,
        &[Scalar::Long(4), Scalar::Long(5), Scalar::Long(6)],
        3,
    )
    .unwrap();
    assert_eq!(ctx.array_put(chid, DbrType::Long, 3, &data), Eca::NORMAL);
    ctx.flush_io();
    assert_eq!(
        server.values("cawavel"),
        Some(vec![Scalar::Long(4), Scalar::Long(5), Scalar::Long(6)])
    );
}

#[test]
fn preemptive_context_dispatches_without_pend() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, recorder) = context(&server, true);
    let chid = ctx.create_channel("catest", Priority::DEFAULT, true).unwrap();

    let deadline = Instant::now() + LONG;
    while recorder.connections.lock().unwrap().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        recorder.connections.lock().unwrap().as_slice(),
        &[(chid, CaOp::ConnUp)]
    );
    ctx.destroy();
}

#[test]
fn destroyed_context_rejects_requests() {
    let server = LoopbackServer::with_demo_records();
    let (ctx, _) = context(&server, false);
    ctx.destroy();
    assert_eq!(
        ctx.create_channel("catest", Priority::DEFAULT, false),
        Err(Eca::NOCACTX)
    );
    assert_eq!(ctx.sg_create(), Err(Eca::NOCACTX));
}
