use std::collections::VecDeque;
use std::rc::Rc;

use crate::buffer::{BufferPool, Writer};
use crate::config::{DisconnectPolicy, NetConfig};
use crate::entity::{EntityDirectory, EntityId, EntityRegistry, NetEntity, Role, has_authority};
use crate::error::{NetError, NetResult, WireResult};
use crate::protocol::packets::{
    Despawn, HandshakeRequest, HandshakeResponse, ModifyEntity, PROTOCOL_VERSION, Ping, Pong,
    Spawn, TransformDelta,
};
use crate::protocol::{Packet, RpcArgs, RpcTarget, pack, pack_rpc};
use crate::snapshot::Transform;
use crate::time::Clock;

use super::batcher::BatchFraming;
use super::connection::{Connection, ConnectionTable};
use super::directory::{DirectoryBuilder, RpcDirectory};
use super::dispatcher::{DispatchReport, ReceiveMode, dispatch};
use super::events::{DisconnectReason, ServerEvent};
use super::stats::NetworkStats;
use super::transport::{Channel, ConnectionId, ServerTransport, TransportEvent};

pub struct NetServer {
    config: NetConfig,
    transport: Box<dyn ServerTransport>,
    clock: Box<dyn Clock>,
    directory: Rc<RpcDirectory<NetServer>>,
    connections: ConnectionTable,
    entities: EntityRegistry,
    pool: BufferPool,
    stats: NetworkStats,
    tick: u64,
    last_update_ms: Option<f64>,
    accumulator_ms: f64,
    pending_events: VecDeque<ServerEvent>,
}

impl EntityDirectory for NetServer {
    fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains(id)
    }
}

impl NetServer {
    pub fn new(
        config: NetConfig,
        transport: impl ServerTransport + 'static,
        clock: impl Clock + 'static,
        mut directory: DirectoryBuilder<NetServer>,
    ) -> NetResult<Self> {
        config.validate()?;
        directory.on_packet(Self::on_handshake)?;
        directory.on_packet(Self::on_ping)?;
        directory.on_packet(Self::on_transform_delta)?;
        directory.register_packet::<HandshakeResponse>()?;
        directory.register_packet::<Pong>()?;
        directory.register_packet::<Spawn>()?;
        directory.register_packet::<Despawn>()?;
        directory.register_packet::<ModifyEntity>()?;

        Ok(Self {
            transport: Box::new(transport),
            clock: Box::new(clock),
            directory: Rc::new(directory.build()),
            connections: ConnectionTable::new(config.max_connections),
            entities: EntityRegistry::new(),
            pool: BufferPool::new(config.max_buffer_size, config.max_pooled_buffers),
            stats: NetworkStats::default(),
            tick: 0,
            last_update_ms: None,
            accumulator_ms: 0.0,
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn directory(&self) -> &RpcDirectory<NetServer> {
        &self.directory
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn is_running(&self) -> bool {
        self.transport.is_running()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn all_connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn is_authenticated(&self, id: ConnectionId) -> bool {
        self.connections
            .get(id)
            .is_some_and(Connection::is_authenticated)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn start(&mut self, headless: bool) -> NetResult<()> {
        self.transport.start(headless)?;
        self.last_update_ms = None;
        self.accumulator_ms = 0.0;
        log::info!(
            "server started: tick rate {}, authority {:?}",
            self.config.tick_rate,
            self.config.authority_mode
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(Connection::id).collect();
        for id in ids {
            self.kick(id, DisconnectReason::Kicked);
        }
        self.transport.stop();
        log::info!("server stopped");
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
                TransportEvent::Connected(id) => self.accept(id),
                TransportEvent::Disconnected(id) => {
                    self.remove_connection(id, DisconnectReason::Graceful)
                }
                TransportEvent::Received {
                    connection, bytes, ..
                } => self.receive(connection, &bytes),
                TransportEvent::Sent { connection, bytes } => {
                    log::trace!("sent {} bytes to {}", bytes, connection);
                }
                TransportEvent::Error {
                    connection,
                    code,
                    message,
                } => {
                    log::error!("transport error {} on {:?}: {}", code, connection, message);
                    self.pending_events.push_back(ServerEvent::Error { message });
                    if let Some(id) = connection {
                        self.kick(id, DisconnectReason::TransportError);
                    }
                }
            }
        }
    }

    pub fn tick(&mut self) -> NetResult<()> {
        self.tick += 1;
        let now = self.clock.now_ms();

        for id in self
            .connections
            .timed_out(now, self.config.connection_timeout_ms)
        {
            self.kick(id, DisconnectReason::Timeout);
        }

        let mode = self.config.authority_mode;
        let mut deltas = Vec::new();
        for entity in self.entities.iter_mut() {
            if has_authority(mode, entity.owner, Role::Server) {
                if let Some(delta) = entity.sync.collect_delta(entity.id, now, now) {
                    deltas.push(delta);
                }
            } else {
                entity.sync.render(now);
            }
        }

        for delta in &deltas {
            self.broadcast(delta, Channel::Unreliable)?;
        }
        self.flush()
    }

    pub fn flush(&mut self) -> NetResult<()> {
        let mut out = self.pool.acquire_writer();

        for conn in self.connections.iter_mut() {
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

                    match self.transport.send_to(out.as_bytes(), channel, conn.id()) {
                        Ok(()) => {
                            conn.stats.record_sent(out.len());
                            self.stats.record_sent(out.len());
                        }
                        Err(e) => log::warn!("send to {} failed: {}", conn.id(), e),
                    }
                }
            }
        }

        self.pool.release_writer(out);
        Ok(())
    }

    pub fn send<P: Packet>(
        &mut self,
        connection: ConnectionId,
        packet: &P,
        channel: Channel,
        instant: bool,
    ) -> NetResult<()> {
        let message = self.serialize(|writer| pack(packet, writer))?;
        self.deliver(connection, message, channel, instant)
    }

    pub fn send_rpc<A: RpcArgs>(
        &mut self,
        connection: ConnectionId,
        target: RpcTarget,
        args: &A,
        channel: Channel,
    ) -> NetResult<()> {
        let message = self.serialize(|writer| pack_rpc(target, args, writer))?;
        self.deliver(connection, message, channel, false)
    }

    pub fn broadcast<P: Packet>(&mut self, packet: &P, channel: Channel) -> NetResult<()> {
        self.broadcast_except(None, packet, channel)
    }

    pub fn broadcast_rpc<A: RpcArgs>(
        &mut self,
        target: RpcTarget,
        args: &A,
        channel: Channel,
    ) -> NetResult<()> {
        let message = self.serialize(|writer| pack_rpc(target, args, writer))?;
        self.fan_out(None, message, channel)
    }

    fn broadcast_except<P: Packet>(
        &mut self,
        except: Option<ConnectionId>,
        packet: &P,
        channel: Channel,
    ) -> NetResult<()> {
        let message = self.serialize(|writer| pack(packet, writer))?;
        self.fan_out(except, message, channel)
    }

    fn fan_out(
        &mut self,
        except: Option<ConnectionId>,
        message: Writer,
        channel: Channel,
    ) -> NetResult<()> {
        let targets: Vec<ConnectionId> = self
            .connections
            .authenticated_ids()
            .into_iter()
            .filter(|id| Some(*id) != except)
            .collect();

        for id in targets {
            let mut copy = self.pool.acquire_writer();
            if let Err(e) = copy.write_bytes(message.as_bytes()) {
                self.pool.release_writer(copy);
                self.pool.release_writer(message);
                return Err(e.into());
            }
            if let Err(e) = self.deliver(id, copy, channel, false) {
                log::warn!("broadcast to {} failed: {}", id, e);
            }
        }

        self.pool.release_writer(message);
        Ok(())
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

    fn deliver(
        &mut self,
        connection: ConnectionId,
        message: Writer,
        channel: Channel,
        instant: bool,
    ) -> NetResult<()> {
        let Some(conn) = self.connections.get_mut(connection) else {
            self.pool.release_writer(message);
            return Err(NetError::UnknownConnection(connection));
        };

        if !instant {
            return conn.queue(channel, message, &mut self.pool);
        }

        let result = self.transport.send_to(message.as_bytes(), channel, connection);
        if result.is_ok() {
            conn.stats.record_sent(message.len());
            self.stats.record_sent(message.len());
        }
        self.pool.release_writer(message);
        result.map_err(NetError::from)
    }

    pub fn spawn(
        &mut self,
        prefab: impl Into<String>,
        owner: Option<ConnectionId>,
        transform: Transform,
    ) -> NetResult<EntityId> {
        let id = self.entities.allocate_id();
        let entity = NetEntity::new(id, prefab, owner, transform, &self.config);
        let spawn = entity.to_spawn();
        self.entities.insert(entity);

        log::debug!("spawned entity {} ({}) owner {:?}", id, spawn.prefab, owner);
        self.broadcast(&spawn, Channel::Reliable)?;
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> NetResult<()> {
        self.entities
            .remove(id)
            .ok_or(NetError::UnknownEntity(id))?;
        log::debug!("despawned entity {}", id);
        self.broadcast(&Despawn { entity_id: id }, Channel::Reliable)
    }

    pub fn set_owner(&mut self, id: EntityId, owner: Option<ConnectionId>) -> NetResult<()> {
        let entity = self
            .entities
            .get_mut(id)
            .ok_or(NetError::UnknownEntity(id))?;
        entity.set_owner(owner);
        self.broadcast(
            &ModifyEntity {
                entity_id: id,
                owner,
            },
            Channel::Reliable,
        )
    }

    pub fn set_transform(&mut self, id: EntityId, transform: Transform) -> NetResult<()> {
        let mode = self.config.authority_mode;
        self.entities
            .get_mut(id)
            .ok_or(NetError::UnknownEntity(id))?
            .write_transform(mode, Role::Server, transform)
    }

    pub fn disconnect(&mut self, id: ConnectionId) {
        self.kick(id, DisconnectReason::Kicked);
    }

    fn kick(&mut self, id: ConnectionId, reason: DisconnectReason) {
        self.transport.disconnect(id);
        self.remove_connection(id, reason);
    }

    fn accept(&mut self, id: ConnectionId) {
        if self.connections.is_full() {
            log::warn!("rejecting connection {}: server full", id);
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                connection: id,
                reason: DisconnectReason::ServerFull,
            });
            self.transport.disconnect(id);
            return;
        }

        let mut conn = Connection::new(
            id,
            format!("#{}", id),
            BatchFraming::Unframed,
            self.config.max_batch_size,
            self.clock.now_ms(),
        );
        conn.on_transport_connected();
        self.connections.insert(conn);

        log::info!("connection {} opened, awaiting handshake", id);
        self.pending_events
            .push_back(ServerEvent::ClientConnected { connection: id });
    }

    fn remove_connection(&mut self, id: ConnectionId, reason: DisconnectReason) {
        let Some(mut conn) = self.connections.remove(id) else {
            return;
        };

        let dropped = conn.close(&mut self.pool);
        if dropped > 0 {
            log::debug!("dropped {} queued messages for {}", dropped, id);
        }

        for entity_id in self.entities.owned_by(id) {
            let result = match self.config.disconnect_policy {
                DisconnectPolicy::Despawn => self.despawn(entity_id),
                DisconnectPolicy::Unown => self.set_owner(entity_id, None),
            };
            if let Err(e) = result {
                log::warn!("cleanup of entity {} failed: {}", entity_id, e);
            }
        }

        log::info!("connection {} {}", id, reason.as_str());
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { connection: id, reason });
    }

    fn receive(&mut self, sender: ConnectionId, bytes: &[u8]) {
        let now = self.clock.now_ms();
        let Some(conn) = self.connections.get_mut(sender) else {
            log::debug!("{} bytes from unknown connection {}", bytes.len(), sender);
            return;
        };
        conn.touch(now);
        conn.stats.record_received(bytes.len());
        self.stats.record_received(bytes.len());

        let mut reader = match self.pool.acquire_reader(bytes) {
            Ok(reader) => reader,
            Err(e) => {
                log::warn!("rejecting batch from {}: {}", sender, e);
                return;
            }
        };

        let directory = Rc::clone(&self.directory);
        let report = dispatch(self, &directory, sender, &mut reader, ReceiveMode::CountPrefixed);
        self.pool.release_reader(reader);
        self.record_report(sender, report);
    }

    fn record_report(&mut self, sender: ConnectionId, report: DispatchReport) {
        self.stats.record_dispatch(report.dispatched, report.dropped);
        if let Some(conn) = self.connections.get_mut(sender) {
            conn.stats.record_dispatch(report.dispatched, report.dropped);
        }
    }

    fn on_handshake(&mut self, sender: ConnectionId, request: HandshakeRequest) -> NetResult<()> {
        let conn = self
            .connections
            .get_mut(sender)
            .ok_or(NetError::UnknownConnection(sender))?;

        if conn.is_authenticated() {
            log::warn!("connection {} repeated its handshake, ignored", sender);
            return Ok(());
        }

        if request.protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "connection {} speaks protocol {}, expected {}",
                sender,
                request.protocol_version,
                PROTOCOL_VERSION
            );
            self.pending_events.push_back(ServerEvent::ConnectionDenied {
                connection: sender,
                reason: DisconnectReason::VersionMismatch,
            });
            self.kick(sender, DisconnectReason::VersionMismatch);
            return Ok(());
        }

        if !conn.authenticate() {
            log::warn!("connection {} is {:?}, handshake ignored", sender, conn.state());
            return Ok(());
        }
        log::info!("connection {} authenticated", sender);

        self.send(
            sender,
            &HandshakeResponse {
                connection_id: sender,
            },
            Channel::Reliable,
            true,
        )?;

        let spawns: Vec<Spawn> = self.entities.iter().map(NetEntity::to_spawn).collect();
        for spawn in &spawns {
            self.send(sender, spawn, Channel::Reliable, false)?;
        }

        self.pending_events
            .push_back(ServerEvent::ClientAuthenticated { connection: sender });

        if let Some(prefab) = self.config.player_prefab.clone() {
            self.spawn(prefab, Some(sender), Transform::default())?;
        }
        Ok(())
    }

    fn on_ping(&mut self, sender: ConnectionId, ping: Ping) -> NetResult<()> {
        let received_ms = self.clock.now_ms();
        let conn = self
            .connections
            .get_mut(sender)
            .ok_or(NetError::UnknownConnection(sender))?;
        if !conn.is_authenticated() {
            return Err(NetError::NotAuthenticated);
        }
        if ping.rtt_ms > 0.0 {
            conn.set_rtt_ms(ping.rtt_ms);
        }

        let pong = Pong {
            client_time_ms: ping.client_time_ms,
            server_receive_ms: received_ms,
            server_send_ms: self.clock.now_ms(),
        };
        self.send(sender, &pong, Channel::Unreliable, true)
    }

    /// Client-written transforms: accepted only from the owner, then relayed
    /// to everyone else.
    fn on_transform_delta(&mut self, sender: ConnectionId, delta: TransformDelta) -> NetResult<()> {
        if !self.is_authenticated(sender) {
            return Err(NetError::NotAuthenticated);
        }

        let mode = self.config.authority_mode;
        let now = self.clock.now_ms();
        let entity = self
            .entities
            .get_mut(delta.entity_id)
            .ok_or(NetError::UnknownEntity(delta.entity_id))?;

        if !has_authority(mode, entity.owner, Role::Client(sender)) {
            return Err(NetError::AuthorityViolation {
                entity_id: delta.entity_id,
            });
        }

        entity.sync.ingest(&delta, now);
        self.broadcast_except(Some(sender), &delta, Channel::Unreliable)
    }
}
