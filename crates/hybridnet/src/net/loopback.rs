//! In-process transport. Server and clients share one hub; datagrams are
//! held in per-direction min-heaps until the hub clock reaches their release
//! time. Unreliable traffic is subject to `LinkConditions`; reliable traffic
//! is delayed but never dropped or reordered.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, VecDeque};
use std::rc::Rc;

use crate::error::TransportError;
use crate::time::Clock;

use super::stats::LinkConditions;
use super::transport::{Channel, ClientTransport, ConnectionId, ServerTransport, TransportEvent};

#[derive(Debug)]
struct InFlight {
    release_ms: f64,
    sequence: u64,
    channel: Channel,
    bytes: Vec<u8>,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_ms
            .total_cmp(&self.release_ms)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToServer = 0,
    ToClient = 1,
}

#[derive(Debug, Default)]
struct Link {
    queues: [BinaryHeap<InFlight>; 2],
    reliable_floor_ms: [f64; 2],
}

impl Link {
    fn take_ready(&mut self, direction: Direction, now_ms: f64) -> Vec<InFlight> {
        let queue = &mut self.queues[direction as usize];
        let mut ready = Vec::new();
        while queue.peek().is_some_and(|d| d.release_ms <= now_ms) {
            if let Some(datagram) = queue.pop() {
                ready.push(datagram);
            }
        }
        ready
    }

    fn in_flight(&self) -> usize {
        self.queues.iter().map(BinaryHeap::len).sum()
    }
}

struct Hub {
    clock: Box<dyn Clock>,
    conditions: LinkConditions,
    rng: fastrand::Rng,
    server_running: bool,
    next_connection_id: ConnectionId,
    sequence: u64,
    links: BTreeMap<ConnectionId, Link>,
    server_events: VecDeque<TransportEvent>,
    client_events: HashMap<ConnectionId, VecDeque<TransportEvent>>,
}

impl Hub {
    fn send(
        &mut self,
        connection: ConnectionId,
        direction: Direction,
        channel: Channel,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        if !self.links.contains_key(&connection) {
            return Err(TransportError::UnknownConnection(connection));
        }

        if channel == Channel::Unreliable && self.conditions.should_drop(&mut self.rng) {
            log::trace!("loopback dropped {} bytes for {}", bytes.len(), connection);
            return Ok(());
        }

        let mut release_ms = self.clock.now_ms() + self.conditions.delay_ms(&mut self.rng);
        self.sequence += 1;
        let sequence = self.sequence;

        let link = self
            .links
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))?;

        if channel == Channel::Reliable {
            let floor = &mut link.reliable_floor_ms[direction as usize];
            release_ms = release_ms.max(*floor);
            *floor = release_ms;
        }

        link.queues[direction as usize].push(InFlight {
            release_ms,
            sequence,
            channel,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn drop_link(&mut self, connection: ConnectionId) -> bool {
        if self.links.remove(&connection).is_none() {
            return false;
        }
        self.client_events
            .entry(connection)
            .or_default()
            .push_back(TransportEvent::Disconnected(connection));
        self.server_events
            .push_back(TransportEvent::Disconnected(connection));
        true
    }
}

#[derive(Clone)]
pub struct LoopbackHub {
    inner: Rc<RefCell<Hub>>,
}

impl LoopbackHub {
    pub fn new(clock: impl Clock + 'static) -> Self {
        Self::with_conditions(clock, LinkConditions::default(), 0)
    }

    pub fn with_conditions(clock: impl Clock + 'static, conditions: LinkConditions, seed: u64) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Hub {
                clock: Box::new(clock),
                conditions,
                rng: fastrand::Rng::with_seed(seed),
                server_running: false,
                next_connection_id: 1,
                sequence: 0,
                links: BTreeMap::new(),
                server_events: VecDeque::new(),
                client_events: HashMap::new(),
            })),
        }
    }

    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.inner.borrow_mut().conditions = conditions;
    }

    pub fn set_next_connection_id(&self, id: ConnectionId) {
        self.inner.borrow_mut().next_connection_id = id;
    }

    pub fn in_flight(&self) -> usize {
        self.inner.borrow().links.values().map(Link::in_flight).sum()
    }

    pub fn server(&self) -> LoopbackServer {
        LoopbackServer { hub: self.clone() }
    }

    pub fn client(&self) -> LoopbackClient {
        LoopbackClient {
            hub: self.clone(),
            connection: None,
        }
    }
}

pub struct LoopbackServer {
    hub: LoopbackHub,
}

impl ServerTransport for LoopbackServer {
    fn start(&mut self, headless: bool) -> Result<(), TransportError> {
        let mut hub = self.hub.inner.borrow_mut();
        hub.server_running = true;
        log::info!("loopback server started (headless: {})", headless);
        Ok(())
    }

    fn stop(&mut self) {
        let mut hub = self.hub.inner.borrow_mut();
        if !hub.server_running {
            return;
        }
        hub.server_running = false;
        let ids: Vec<ConnectionId> = hub.links.keys().copied().collect();
        for id in ids {
            hub.drop_link(id);
        }
        hub.server_events.clear();
        log::info!("loopback server stopped");
    }

    fn is_running(&self) -> bool {
        self.hub.inner.borrow().server_running
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut hub = self.hub.inner.borrow_mut();
        if !hub.server_running {
            return Vec::new();
        }

        let now_ms = hub.clock.now_ms();
        let mut events: Vec<TransportEvent> = hub.server_events.drain(..).collect();
        for (&connection, link) in hub.links.iter_mut() {
            for datagram in link.take_ready(Direction::ToServer, now_ms) {
                events.push(TransportEvent::Received {
                    connection,
                    channel: datagram.channel,
                    bytes: datagram.bytes,
                });
            }
        }
        events
    }

    fn send_to(
        &mut self,
        bytes: &[u8],
        channel: Channel,
        connection: ConnectionId,
    ) -> Result<(), TransportError> {
        let mut hub = self.hub.inner.borrow_mut();
        if !hub.server_running {
            return Err(TransportError::NotStarted);
        }
        hub.send(connection, Direction::ToClient, channel, bytes)?;
        hub.server_events.push_back(TransportEvent::Sent {
            connection,
            bytes: bytes.len(),
        });
        Ok(())
    }

    fn disconnect(&mut self, connection: ConnectionId) {
        if self.hub.inner.borrow_mut().drop_link(connection) {
            log::debug!("loopback closed connection {}", connection);
        }
    }
}

pub struct LoopbackClient {
    hub: LoopbackHub,
    connection: Option<ConnectionId>,
}

impl LoopbackClient {
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection
    }
}

impl ClientTransport for LoopbackClient {
    fn start(&mut self, target: &str) -> bool {
        if self.connection.is_some() {
            return false;
        }

        let mut hub = self.hub.inner.borrow_mut();
        if !hub.server_running {
            log::warn!("loopback target {} is not listening", target);
            return false;
        }

        let mut id = hub.next_connection_id;
        while hub.links.contains_key(&id) {
            id = id.wrapping_add(1);
        }
        hub.next_connection_id = id.wrapping_add(1);

        hub.links.insert(id, Link::default());
        hub.client_events
            .insert(id, VecDeque::from([TransportEvent::Connected(id)]));
        hub.server_events.push_back(TransportEvent::Connected(id));
        self.connection = Some(id);
        true
    }

    fn stop(&mut self) {
        let Some(id) = self.connection.take() else {
            return;
        };
        let mut hub = self.hub.inner.borrow_mut();
        if hub.links.remove(&id).is_some() {
            hub.server_events.push_back(TransportEvent::Disconnected(id));
        }
        hub.client_events.remove(&id);
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let Some(id) = self.connection else {
            return Vec::new();
        };
        let mut hub = self.hub.inner.borrow_mut();
        let now_ms = hub.clock.now_ms();

        let mut events: Vec<TransportEvent> = hub
            .client_events
            .get_mut(&id)
            .map(|queue| queue.drain(..).collect())
            .unwrap_or_default();

        let ready = hub
            .links
            .get_mut(&id)
            .map(|link| link.take_ready(Direction::ToClient, now_ms));

        match ready {
            Some(ready) => events.extend(ready.into_iter().map(|datagram| {
                TransportEvent::Received {
                    connection: id,
                    channel: datagram.channel,
                    bytes: datagram.bytes,
                }
            })),
            None => {
                hub.client_events.remove(&id);
                self.connection = None;
            }
        }
        events
    }

    fn send(&mut self, bytes: &[u8], channel: Channel) -> Result<(), TransportError> {
        let id = self.connection.ok_or(TransportError::NotStarted)?;
        let mut hub = self.hub.inner.borrow_mut();
        hub.send(id, Direction::ToServer, channel, bytes)?;
        hub.client_events
            .entry(id)
            .or_default()
            .push_back(TransportEvent::Sent {
                connection: id,
                bytes: bytes.len(),
            });
        Ok(())
    }
}
