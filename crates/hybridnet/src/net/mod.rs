mod batcher;
mod client;
mod connection;
mod directory;
mod dispatcher;
mod events;
mod loopback;
mod server;
mod stats;
mod transport;

pub use batcher::{BatchFraming, Batcher, MAX_BATCH_MESSAGES};
pub use client::NetClient;
pub use connection::{Connection, ConnectionState, ConnectionTable, SERVER_CONNECTION_ID};
pub use directory::{DirectoryBuilder, RpcCall, RpcDirectory};
pub use dispatcher::{DispatchReport, MessageError, Outcome, ReceiveMode, dispatch};
pub use events::{ClientEvent, DisconnectReason, ServerEvent};
pub use loopback::{LoopbackClient, LoopbackHub, LoopbackServer};
pub use server::NetServer;
pub use stats::{LinkConditions, NetworkStats};
pub use transport::{Channel, ClientTransport, ConnectionId, ServerTransport, TransportEvent};
