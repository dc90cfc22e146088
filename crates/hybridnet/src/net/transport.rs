use crate::error::TransportError;

pub type ConnectionId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Reliable = 0,
    Unreliable = 1,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Reliable, Channel::Unreliable];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Received {
        connection: ConnectionId,
        channel: Channel,
        bytes: Vec<u8>,
    },
    Sent {
        connection: ConnectionId,
        bytes: usize,
    },
    Error {
        connection: Option<ConnectionId>,
        code: i32,
        message: String,
    },
}

/// Listening half of a transport. Events are pulled with `poll` once per
/// tick; the engine never blocks on the transport.
pub trait ServerTransport {
    fn start(&mut self, headless: bool) -> Result<(), TransportError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    fn poll(&mut self) -> Vec<TransportEvent>;
    fn send_to(
        &mut self,
        bytes: &[u8],
        channel: Channel,
        connection: ConnectionId,
    ) -> Result<(), TransportError>;
    fn disconnect(&mut self, connection: ConnectionId);
}

pub trait ClientTransport {
    fn start(&mut self, target: &str) -> bool;
    fn stop(&mut self);
    fn poll(&mut self) -> Vec<TransportEvent>;
    fn send(&mut self, bytes: &[u8], channel: Channel) -> Result<(), TransportError>;
}
