pub mod buffer;
pub mod config;
pub mod entity;
pub mod error;
pub mod net;
pub mod protocol;
pub mod snapshot;
pub mod time;

pub use buffer::{BufferPool, Reader, Writer};
pub use config::{
    AuthorityMode, ClockSyncConfig, DisconnectPolicy, InterpolationConfig, NetConfig,
    DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_TICK_RATE,
};
pub use entity::{EntityDirectory, EntityId, EntityRegistry, NetEntity, Role, has_authority};
pub use error::{NetError, NetResult, TransportError, WireError, WireResult};
pub use net::{
    Channel, ClientEvent, ClientTransport, Connection, ConnectionId, ConnectionState,
    DirectoryBuilder, DisconnectReason, DispatchReport, LinkConditions, LoopbackHub, NetClient,
    NetServer, NetworkStats, ReceiveMode, RpcCall, RpcDirectory, ServerEvent, ServerTransport,
    TransportEvent,
};
pub use protocol::packets::PROTOCOL_VERSION;
pub use protocol::{Packet, RpcArgs, RpcTarget, Wire, stable_hash};
pub use snapshot::{SnapshotBuffer, Transform, TransformSnapshot, TransformSync};
pub use time::{Clock, ClockSample, ClockSync, ManualClock, MonotonicClock};
