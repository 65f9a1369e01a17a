use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use caprims_dbr::DbrType;
use caprims_native::{AccessRights, CaOp, ChanId, Eca, EventArgs, EventSink, ExceptionArgs};
use serde::Serialize;
use tracing::{trace, warn};

use crate::context::{Attachment, CallbackScope};
use crate::registry::{AccessRightsEvent, ConnectionEvent, Registry};

pub type ExceptionHandler = Arc<dyn Fn(&ExceptionEvent) + Send + Sync>;

/// An asynchronous failure reported outside any request callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceptionEvent {
    pub chid: Option<u64>,
    pub op: CaOp,
    /// `None` when the native library reported an identifier outside the catalog.
    pub dbr_type: Option<DbrType>,
    pub count: usize,
    pub status: Eca,
    pub context: String,
    pub file: Option<String>,
    pub line: u32,
}

impl From<ExceptionArgs<'_>> for ExceptionEvent {
    fn from(args: ExceptionArgs<'_>) -> Self {
        Self {
            chid: args.chid.map(|chid| chid.0),
            op: args.op,
            dbr_type: DbrType::from_raw(args.dbr_type).ok(),
            count: args.count,
            status: args.status,
            context: args.context.to_string(),
            file: args.file.map(str::to_string),
            line: args.line,
        }
    }
}

/// Receives native notifications for one context and routes them.
///
/// Every callback runs with the dispatching thread counted as attached to
/// the owning context.
pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    exceptions: Mutex<Option<ExceptionHandler>>,
    owner: OnceLock<Attachment>,
}

impl Dispatcher {
    pub(crate) fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            exceptions: Mutex::new(None),
            owner: OnceLock::new(),
        }
    }

    pub(crate) fn bind(&self, owner: Attachment) {
        // First binding wins; a context binds exactly once.
        let _ = self.owner.set(owner);
    }

    pub(crate) fn set_exception_handler(&self, handler: Option<ExceptionHandler>) {
        *self.lock_exceptions() = handler;
    }

    fn lock_exceptions(&self) -> MutexGuard<'_, Option<ExceptionHandler>> {
        self.exceptions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scope(&self) -> Option<CallbackScope> {
        self.owner.get().map(CallbackScope::enter)
    }
}

impl EventSink for Dispatcher {
    fn on_event(&self, event: EventArgs<'_>) {
        let _scope = self.scope();
        self.registry.complete(&event);
    }

    fn on_connection(&self, chid: ChanId, op: CaOp) {
        let Some(callback) = self.registry.connection_callback(chid) else {
            trace!(%chid, ?op, "connection event without callback dropped");
            return;
        };
        let _scope = self.scope();
        callback(ConnectionEvent { chid, op });
    }

    fn on_access_rights(&self, chid: ChanId, rights: AccessRights) {
        let Some(callback) = self.registry.access_rights_callback(chid) else {
            trace!(%chid, "access rights event without callback dropped");
            return;
        };
        let _scope = self.scope();
        callback(AccessRightsEvent { chid, rights });
    }

    fn on_exception(&self, exception: ExceptionArgs<'_>) {
        let handler = self.lock_exceptions().clone();
        let Some(handler) = handler else {
            warn!(
                status = %exception.status,
                context = exception.context,
                op = ?exception.op,
                count = exception.count,
                "channel access exception"
            );
            return;
        };
        let _scope = self.scope();
        handler(&ExceptionEvent::from(exception));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_event_keeps_unknown_type_as_none() {
        let event = ExceptionEvent::from(ExceptionArgs {
            chid: Some(ChanId(3)),
            op: CaOp::Put,
            dbr_type: 99,
            count: 1,
            status: Eca::PUTFAIL,
            context: "catest",
            file: None,
            line: 0,
        });
        assert_eq!(event.chid, Some(3));
        assert_eq!(event.dbr_type, None);
        assert_eq!(event.status, Eca::PUTFAIL);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["op"], "put");
        assert_eq!(json["context"], "catest");
    }

    #[test]
    fn exception_without_handler_is_logged_only() {
        let dispatcher = Dispatcher::new(Arc::new(Registry::new()));
        dispatcher.on_exception(ExceptionArgs {
            chid: None,
            op: CaOp::Other,
            dbr_type: -1,
            count: 0,
            status: Eca::DISCONN,
            context: "",
            file: None,
            line: 0,
        });
    }
}
