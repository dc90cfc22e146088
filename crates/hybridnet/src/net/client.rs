use std::collections::VecDeque;
use std::rc::Rc;

use crate::buffer::{BufferPool, Writer};
use crate::config::NetConfig;
use crate::entity::{EntityDirectory, EntityId, EntityRegistry, NetEntity, Role, has_authority};
use crate::error::{NetError, NetResult, TransportError, WireResult};
use crate::protocol::packets::{
    Despawn, HandshakeRequest, HandshakeResponse, ModifyEntity, PROTOCOL_VERSION, Ping, Pong,
    Spawn, TransformDelta,
};
use crate::protocol::{Packet, RpcArgs, RpcTarget, pack, pack_rpc};
use crate::snapshot::Transform;
use crate::time::{ClockSample, ClockSync, ClockUpdate, Clock};

use super::batcher::BatchFraming;
use super::connection::{Connection, SERVER_CONNECTION_ID};
use super::directory::{DirectoryBuilder, RpcDirectory};
use super::dispatcher::{ReceiveMode, dispatch};
use super::events::{ClientEvent, DisconnectReason};
use super::stats::NetworkStats;
use super::transport::{Channel, ClientTransport, ConnectionId, TransportEvent};

pub struct NetClient {
    config: NetConfig,
    transport: Box<dyn ClientTransport>,
    clock: Box<dyn Clock>,
    directory: Rc<RpcDirectory<NetClient>>,
    connection: Option<Connection>,
    local_id: Option<ConnectionId>,
    clock_sync: ClockSync,
    entities: EntityRegistry,
    pool: BufferPool,
    stats: NetworkStats,
    next_ping_ms: f64,
    last_update_ms: Option<f64>,
    accumulator_ms: f64,
    pending_events: VecDeque<ClientEvent>,
}

impl EntityDirectory for NetClient {
    fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains(id)
    }
}

impl NetClient {
    pub fn new(
        config: NetConfig,
        transport: impl ClientTransport + 'static,
        clock: impl Clock + 'static,
        mut directory: DirectoryBuilder<NetClient>,
    ) -> NetResult<Self> {
        config.validate()?;
        directory.on_packet(Self::on_handshake_response)?;
        directory.on_packet(Self::on_spawn)?;
        directory.on_packet(Self::on_despawn)?;
        directory.on_packet(Self::on_modify_entity)?;
        directory.on_packet(Self::on_transform_delta)?;
        directory.on_packet(Self::on_pong)?;
        directory.register_packet::<HandshakeRequest>()?;
        directory.register_packet::<Ping>()?;

        Ok(Self {
            transport: Box::new(transport),
            clock: Box::new(clock),
            directory: Rc::new(directory.build()),
            connection: None,
            local_id: None,
            clock_sync: ClockSync::new(config.clock.clone()),
            entities: EntityRegistry::new(),
            pool: BufferPool::new(config.max_buffer_size, config.max_pooled_buffers),
            stats: NetworkStats::default(),
            next_ping_ms: 0.0,
            last_update_ms: None,
            accumulator_ms: 0.0,
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn directory(&self) -> &RpcDirectory<NetClient> {
        &self.directory
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn local_id(&self) -> Option<ConnectionId> {
        self.local_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.is_open() && c.is_authenticated())
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn clock_sync(&self) -> &ClockSync {
        &self.clock_sync
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn local_time_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    /// Estimated server time; equals local time until the first pong.
    pub fn server_time_ms(&self) -> f64 {
        self.clock_sync.server_time(self.clock.now_ms())
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    fn role(&self) -> Role {
        self.local_id.map_or(Role::Observer, Role::Client)
    }

    pub fn connect(&mut self, target: &str) -> bool {
        if self.connection.as_ref().is_some_and(Connection::is_open) {
            log::warn!("already connected, ignoring connect to {}", target);
            return false;
        }

        if !self.transport.start(target) {
            log::warn!("could not start connecting to {}", target);
            self.pending_events.push_back(ClientEvent::ConnectFailed);
            return false;
        }

        self.connection = Some(Connection::new(
            SERVER_CONNECTION_ID,
            target,
            BatchFraming::CountPrefixed,
            self.config.max_batch_size,
            self.clock.now_ms(),
        ));
        self.last_update_ms = None;
        self.accumulator_ms = 0.0;
        log::info!("connecting to {}", target);
        true
    }

    pub fn disconnect(&mut self) {
        self.transport.stop();
        self.teardown(DisconnectReason::Graceful);
    }

    fn teardown(&mut self, reason: DisconnectReason) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        let dropped = conn.close(&mut self.pool);
        if dropped > 0 {
            log::debug!("dropped {} queued messages", dropped);
        }

        self.local_id = None;
        self.entities.clear();
        self.clock_sync.reset();
        log::info!("connection to {} {}", conn.remote(), reason.as_str());
        self.pending_events
            .push_back(ClientEvent::Disconnected { reason });
    }

    pub fn update(&mut self) -> NetResult<()> {
        self.poll();

        let now = self.clock.now_ms();
        let elapsed = self.last_update_ms.map_or(0.0, |last| now - last);
        self.last_update_ms = Some(now);
        self.accumulator_ms += elapsed;

        let interval = self.config.tick_interval_ms();
        while self.accumulator_ms >= interval {
            self.accumulator_ms -= interval;
            self.tick()?;
        }
        Ok(())
    }

    pub fn poll(&mut self) {
        for event in self.transport.poll() {
            match event {
                TransportEvent::Connected(id) => self.on_connected(id),
                TransportEvent::Disconnected(_) => self.teardown(DisconnectReason::Graceful),
                TransportEvent::Received { bytes, .. } => self.receive(&bytes),
                TransportEvent::Sent { bytes, .. } => {
                    log::trace!("sent {} bytes", bytes);
                }
                TransportEvent::Error { code, message, .. } => {
                    log::error!("transport error {}: {}", code, message);
                    self.pending_events.push_back(ClientEvent::Error { message });
                    self.transport.stop();
                    self.teardown(DisconnectReason::TransportError);
                }
            }
        }
    }

    fn on_connected(&mut self, transport_id: ConnectionId) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if !conn.on_transport_connected() {
            return;
        }
        log::info!("transport connected ({}), sending handshake", transport_id);
        self.pending_events.push_back(ClientEvent::Connected);

        let request = HandshakeRequest {
            protocol_version: PROTOCOL_VERSION,
        };
        if let Err(e) = self.send(&request, Channel::Reliable, true) {
            log::error!("handshake send failed: {}", e);
        }
    }

    pub fn tick(&mut self) -> NetResult<()> {
        let local_now = self.clock.now_ms();

        if self
            .connection
            .as_ref()
            .is_some_and(|c| c.is_timed_out(local_now, self.config.connection_timeout_ms))
        {
            self.transport.stop();
            self.teardown(DisconnectReason::Timeout);
            return Ok(());
        }

        if !self.is_authenticated() {
            return Ok(());
        }

        if local_now >= self.next_ping_ms {
            self.next_ping_ms = local_now + self.config.ping_interval_ms;
            let rtt_ms = self
                .connection
                .as_ref()
                .and_then(Connection::rtt_ms)
                .unwrap_or(0.0);
            self.send(
                &Ping {
                    client_time_ms: local_now,
                    rtt_ms,
                },
                Channel::Unreliable,
                true,
            )?;
        }

        let server_now = self.clock_sync.server_time(local_now);
        let mode = self.config.authority_mode;
        let role = self.role();
        let mut deltas = Vec::new();
        for entity in self.entities.iter_mut() {
            if has_authority(mode, entity.owner, role) {
                if let Some(delta) = entity.sync.collect_delta(entity.id, local_now, server_now) {
                    deltas.push(delta);
                }
            } else {
                entity.sync.render(server_now);
            }
        }

        for delta in &deltas {
            self.send(delta, Channel::Unreliable, false)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> NetResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            return Ok(());
        };
        let mut out = self.pool.acquire_writer();

        for channel in Channel::ALL {
            while conn.pending(channel) > 0 {
                let count = match conn.next_batch(channel, &mut out, &mut self.pool) {
                    Ok(count) => count,
                    Err(e) => {
                        self.pool.release_writer(out);
                        return Err(e.into());
                    }
                };
                if count == 0 {
                    break;
                }

                match self.transport.send(out.as_bytes(), channel) {
                    Ok(()) => {
                        conn.stats.record_sent(out.len());
                        self.stats.record_sent(out.len());
                    }
                    Err(e) => log::warn!("send failed: {}", e),
                }
            }
        }

        self.pool.release_writer(out);
        Ok(())
    }

    pub fn send<P: Packet>(&mut self, packet: &P, channel: Channel, instant: bool) -> NetResult<()> {
        let message = self.serialize(|writer| pack(packet, writer))?;
        self.deliver(message, channel, instant)
    }

    pub fn send_rpc<A: RpcArgs>(
        &mut self,
        target: RpcTarget,
        args: &A,
        channel: Channel,
    ) -> NetResult<()> {
        let message = self.serialize(|writer| pack_rpc(target, args, writer))?;
        self.deliver(message, channel, false)
    }

    fn serialize<F>(&mut self, write: F) -> NetResult<Writer>
    where
        F: FnOnce(&mut Writer) -> WireResult<()>,
    {
        let mut writer = self.pool.acquire_writer();
        match write(&mut writer) {
            Ok(()) => Ok(writer),
            Err(e) => {
                self.pool.release_writer(writer);
                Err(e.into())
            }
        }
    }

    fn deliver(&mut self, message: Writer, channel: Channel, instant: bool) -> NetResult<()> {
        let Some(conn) = self.connection.as_mut() else {
            self.pool.release_writer(message);
            return Err(TransportError::NotStarted.into());
        };

        if !instant {
            return conn.queue(channel, message, &mut self.pool);
        }

        let mut batch = self.pool.acquire_writer();
        let written = batch
            .write_u8(1)
            .and_then(|_| batch.write_bytes(message.as_bytes()));
        self.pool.release_writer(message);

        let result = match written {
            Ok(()) => self
                .transport
                .send(batch.as_bytes(), channel)
                .map_err(NetError::from),
            Err(e) => Err(e.into()),
        };
        if result.is_ok() {
            conn.stats.record_sent(batch.len());
            self.stats.record_sent(batch.len());
        }
        self.pool.release_writer(batch);
        result
    }

    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> NetResult<()> {
        let mode = self.config.authority_mode;
        let role = self.role();
        self.entities
            .get_mut(id)
            .ok_or(NetError::UnknownEntity(id))?
            .write_transform(mode, role, transform)
    }

    fn receive(&mut self, bytes: &[u8]) {
        let now = self.clock.now_ms();
        if let Some(conn) = self.connection.as_mut() {
            conn.touch(now);
            conn.stats.record_received(bytes.len());
        }
        self.stats.record_received(bytes.len());

        let mut reader = match self.pool.acquire_reader(bytes) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("rejecting batch from server: {}", e);
                return;
            }
        };

        let directory = Rc::clone(&self.directory);
        let report = dispatch(
            self,
            &directory,
            SERVER_CONNECTION_ID,
            &mut reader,
            ReceiveMode::Stream,
        );
        self.pool.release_reader(reader);

        self.stats.record_dispatch(report.dispatched, report.dropped);
        if let Some(conn) = self.connection.as_mut() {
            conn.stats.record_dispatch(report.dispatched, report.dropped);
        }
    }

    fn on_handshake_response(
        &mut self,
        _: ConnectionId,
        response: HandshakeResponse,
    ) -> NetResult<()> {
        let conn = self
            .connection
            .as_mut()
            .ok_or(NetError::Transport(TransportError::NotStarted))?;

        if conn.is_authenticated() {
            log::warn!("repeated handshake response ignored");
            return Ok(());
        }
        if !conn.authenticate() {
            log::warn!("handshake response while {:?}, ignored", conn.state());
            return Ok(());
        }

        self.local_id = Some(response.connection_id);
        self.next_ping_ms = self.clock.now_ms();
        log::info!("authenticated as connection {}", response.connection_id);
        self.pending_events.push_back(ClientEvent::Authenticated {
            connection_id: response.connection_id,
        });
        Ok(())
    }

    fn on_spawn(&mut self, _: ConnectionId, spawn: Spawn) -> NetResult<()> {
        let entity = NetEntity::from_spawn(&spawn, &self.config);
        if self.entities.insert(entity).is_some() {
            log::debug!("entity {} respawned", spawn.entity_id);
        }
        self.pending_events.push_back(ClientEvent::EntitySpawned {
            entity_id: spawn.entity_id,
        });
        Ok(())
    }

    fn on_despawn(&mut self, _: ConnectionId, despawn: Despawn) -> NetResult<()> {
        if self.entities.remove(despawn.entity_id).is_none() {
            log::debug!("despawn for unknown entity {}", despawn.entity_id);
            return Ok(());
        }
        self.pending_events.push_back(ClientEvent::EntityDespawned {
            entity_id: despawn.entity_id,
        });
        Ok(())
    }

    fn on_modify_entity(&mut self, _: ConnectionId, modify: ModifyEntity) -> NetResult<()> {
        let entity = self
            .entities
            .get_mut(modify.entity_id)
            .ok_or(NetError::UnknownEntity(modify.entity_id))?;
        entity.set_owner(modify.owner);
        self.pending_events.push_back(ClientEvent::OwnershipChanged {
            entity_id: modify.entity_id,
            owner: modify.owner,
        });
        Ok(())
    }

    fn on_transform_delta(&mut self, _: ConnectionId, delta: TransformDelta) -> NetResult<()> {
        let mode = self.config.authority_mode;
        let role = self.role();
        let server_now = self.server_time_ms();

        let Some(entity) = self.entities.get_mut(delta.entity_id) else {
            log::debug!("delta for unknown entity {}", delta.entity_id);
            return Ok(());
        };
        if has_authority(mode, entity.owner, role) {
            log::trace!("ignoring echo for owned entity {}", delta.entity_id);
            return Ok(());
        }

        entity.sync.ingest(&delta, server_now);
        Ok(())
    }

    fn on_pong(&mut self, _: ConnectionId, pong: Pong) -> NetResult<()> {
        let sample = ClockSample::new(
            pong.client_time_ms,
            pong.server_receive_ms,
            pong.server_send_ms,
            self.clock.now_ms(),
        );

        if let Some(conn) = self.connection.as_mut() {
            conn.set_rtt_ms(sample.delay() as f32);
        }
        if let ClockUpdate::First(offset) = self.clock_sync.add_sample(sample) {
            log::info!("server clock offset {:.1}ms", offset);
        }
        Ok(())
    }
}
