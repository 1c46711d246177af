//! Push channel: transport, connection state and the connection manager.

mod events;
mod manager;
mod state;
pub mod transport;
mod ws;

pub use events::ConnectionEvent;
pub use manager::ConnectionManager;
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{BoxFuture, Connector, Inbound, Link};
pub use ws::{WsConnector, WsLink};
