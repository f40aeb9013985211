use crate::error::WaError;
use crate::store::creds::CredsUpdate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone)]
pub struct LastDisconnect {
    pub error: Option<WaError>,
    pub at: DateTime<Utc>,
}

/// Partial connection lifecycle update; unset fields carry no change.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionState>,
    pub qr: Option<String>,
    pub is_new_login: Option<bool>,
    pub received_pending_notifications: Option<bool>,
    pub last_disconnect: Option<LastDisconnect>,
}

#[derive(Debug, Clone)]
pub enum Event {
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(CredsUpdate),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            Event::CredsUpdate(_) => EventKind::CredsUpdate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionUpdate,
    CredsUpdate,
}

pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

struct WrappedHandler {
    id: usize,
    handler: EventHandler,
}

/// Named-event fan-out with synchronous dispatch on the caller's execution
/// context. Handlers must not block; the I/O loop runs through here.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<WrappedHandler>>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for one event kind, returning its id for `off`.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> usize {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.handlers
            .write()
            .unwrap()
            .entry(kind)
            .or_default()
            .push(WrappedHandler { id, handler });
        id
    }

    pub fn off(&self, id: usize) -> bool {
        let mut handlers = self.handlers.write().unwrap();
        let before: usize = handlers.values().map(Vec::len).sum();
        for list in handlers.values_mut() {
            list.retain(|h| h.id != id);
        }
        handlers.values().map(Vec::len).sum::<usize>() < before
    }

    pub fn emit(&self, event: &Event) {
        // Snapshot before dispatch so handlers may subscribe/unsubscribe
        // without deadlocking.
        let snapshot: Vec<EventHandler> = {
            let handlers = self.handlers.read().unwrap();
            handlers
                .get(&event.kind())
                .map(|list| list.iter().map(|h| h.handler.clone()).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Drops every handler of one kind; used for `connection.update` after
    /// the terminal close event.
    pub fn clear(&self, kind: EventKind) {
        self.handlers.write().unwrap().remove(&kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_emit_reaches_matching_kind_only() {
        let bus = EventBus::new();
        let conn_hits = Arc::new(AtomicU32::new(0));
        let creds_hits = Arc::new(AtomicU32::new(0));

        let counter = conn_hits.clone();
        bus.on(
            EventKind::ConnectionUpdate,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let counter = creds_hits.clone();
        bus.on(
            EventKind::CredsUpdate,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.emit(&Event::ConnectionUpdate(ConnectionUpdate::default()));
        assert_eq!(conn_hits.load(Ordering::SeqCst), 1);
        assert_eq!(creds_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        let id = bus.on(
            EventKind::ConnectionUpdate,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(bus.off(id));
        assert!(!bus.off(id));
        bus.emit(&Event::ConnectionUpdate(ConnectionUpdate::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_follows_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = order.clone();
            bus.on(
                EventKind::ConnectionUpdate,
                Arc::new(move |_| order.lock().unwrap().push(label)),
            );
        }

        bus.emit(&Event::ConnectionUpdate(ConnectionUpdate::default()));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_clear_kind_leaves_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicU32::new(0));

        let counter = hits.clone();
        bus.on(
            EventKind::CredsUpdate,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.on(EventKind::ConnectionUpdate, Arc::new(|_| {}));

        bus.clear(EventKind::ConnectionUpdate);
        bus.emit(&Event::CredsUpdate(CredsUpdate::default()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_subscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let bus_inner = bus.clone();
        bus.on(
            EventKind::ConnectionUpdate,
            Arc::new(move |_| {
                bus_inner.on(EventKind::CredsUpdate, Arc::new(|_| {}));
            }),
        );
        bus.emit(&Event::ConnectionUpdate(ConnectionUpdate::default()));
    }
}
