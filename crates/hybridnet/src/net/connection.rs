use std::collections::BTreeMap;

use crate::buffer::{BufferPool, Writer};
use crate::error::{NetResult, TransportError, WireResult};

use super::batcher::{BatchFraming, Batcher};
use super::stats::NetworkStats;
use super::transport::{Channel, ConnectionId};

pub const SERVER_CONNECTION_ID: ConnectionId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    AwaitingAuthentication,
    Authenticated,
    Disconnected,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote: String,
    state: ConnectionState,
    authenticated: bool,
    rtt_ms: Option<f32>,
    last_receive_ms: f64,
    batchers: [Batcher; 2],
    pub stats: NetworkStats,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        remote: impl Into<String>,
        framing: BatchFraming,
        max_batch_size: usize,
        now_ms: f64,
    ) -> Self {
        Self {
            id,
            remote: remote.into(),
            state: ConnectionState::Connecting,
            authenticated: false,
            rtt_ms: None,
            last_receive_ms: now_ms,
            batchers: [
                Batcher::new(max_batch_size, framing),
                Batcher::new(max_batch_size, framing),
            ],
            stats: NetworkStats::default(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Once set, stays set for the lifetime of the connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Disconnected
    }

    pub fn rtt_ms(&self) -> Option<f32> {
        self.rtt_ms
    }

    pub fn set_rtt_ms(&mut self, rtt_ms: f32) {
        if rtt_ms.is_finite() && rtt_ms >= 0.0 {
            self.rtt_ms = Some(rtt_ms);
        }
    }

    pub fn on_transport_connected(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::AwaitingAuthentication;
        true
    }

    pub fn authenticate(&mut self) -> bool {
        if self.state != ConnectionState::AwaitingAuthentication {
            return false;
        }
        self.state = ConnectionState::Authenticated;
        self.authenticated = true;
        true
    }

    pub fn close(&mut self, pool: &mut BufferPool) -> usize {
        self.state = ConnectionState::Disconnected;
        self.batchers.iter_mut().map(|b| b.clear(pool)).sum()
    }

    pub fn touch(&mut self, now_ms: f64) {
        self.last_receive_ms = now_ms;
    }

    pub fn is_timed_out(&self, now_ms: f64, timeout_ms: f64) -> bool {
        timeout_ms > 0.0 && now_ms - self.last_receive_ms > timeout_ms
    }

    pub fn queue(
        &mut self,
        channel: Channel,
        message: Writer,
        pool: &mut BufferPool,
    ) -> NetResult<()> {
        if !self.is_open() {
            pool.release_writer(message);
            return Err(TransportError::Closed.into());
        }
        self.batchers[channel.index()].push(message, pool)?;
        Ok(())
    }

    pub fn pending(&self, channel: Channel) -> usize {
        self.batchers[channel.index()].len()
    }

    pub fn has_pending(&self) -> bool {
        self.batchers.iter().any(|b| !b.is_empty())
    }

    pub fn next_batch(
        &mut self,
        channel: Channel,
        out: &mut Writer,
        pool: &mut BufferPool,
    ) -> WireResult<usize> {
        self.batchers[channel.index()].flush(out, pool)
    }
}

#[derive(Debug)]
pub struct ConnectionTable {
    connections: BTreeMap<ConnectionId, Connection>,
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: BTreeMap::new(),
            max_connections,
        }
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        self.connections.insert(connection.id(), connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn authenticated_ids(&self) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_authenticated())
            .map(Connection::id)
            .collect()
    }

    pub fn timed_out(&self, now_ms: f64, timeout_ms: f64) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|c| c.is_timed_out(now_ms, timeout_ms))
            .map(Connection::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
