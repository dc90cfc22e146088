use crate::entity::EntityId;

use super::transport::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Kicked,
    VersionMismatch,
    ServerFull,
    TransportError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::VersionMismatch => "protocol version mismatch",
            DisconnectReason::ServerFull => "server full",
            DisconnectReason::TransportError => "transport error",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected {
        connection: ConnectionId,
    },
    ClientAuthenticated {
        connection: ConnectionId,
    },
    ClientDisconnected {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        connection: ConnectionId,
        reason: DisconnectReason,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    ConnectFailed,
    Authenticated {
        connection_id: ConnectionId,
    },
    Disconnected {
        reason: DisconnectReason,
    },
    EntitySpawned {
        entity_id: EntityId,
    },
    EntityDespawned {
        entity_id: EntityId,
    },
    OwnershipChanged {
        entity_id: EntityId,
        owner: Option<ConnectionId>,
    },
    Error {
        message: String,
    },
}
