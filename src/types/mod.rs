pub mod events;

pub use events::{
    ConnectionState, ConnectionUpdate, Event, EventBus, EventHandler, EventKind, LastDisconnect,
};
