use std::cell::RefCell;
use std::rc::Rc;

use glam::{Quat, Vec3};

use hybridnet::net::{ClientTransport, LoopbackHub};
use hybridnet::protocol::packets::{Despawn, HandshakeRequest, HandshakeResponse, TransformDelta};
use hybridnet::protocol::pack;
use hybridnet::{
    AuthorityMode, Channel, ClientEvent, DirectoryBuilder, DisconnectPolicy, DisconnectReason,
    LinkConditions, ManualClock, NetClient, NetConfig, NetError, NetServer, PROTOCOL_VERSION,
    RpcCall, RpcTarget, ServerEvent, Transform, TransportEvent, Writer,
};

hybridnet::packet! {
    #[derive(Debug, Clone, PartialEq)]
    pub struct Chat as "tests.Chat" {
        pub text: String,
    }
}

struct Harness {
    clock: ManualClock,
    hub: LoopbackHub,
    config: NetConfig,
    server: NetServer,
    clients: Vec<NetClient>,
}

impl Harness {
    fn new(config: NetConfig, conditions: LinkConditions) -> Self {
        Self::with_directory(config, conditions, DirectoryBuilder::new())
    }

    fn with_directory(
        config: NetConfig,
        conditions: LinkConditions,
        directory: DirectoryBuilder<NetServer>,
    ) -> Self {
        let clock = ManualClock::new(10_000.0);
        let hub = LoopbackHub::with_conditions(clock.clone(), conditions, 5);
        let mut server =
            NetServer::new(config.clone(), hub.server(), clock.clone(), directory).unwrap();
        server.start(true).unwrap();

        Self {
            clock,
            hub,
            config,
            server,
            clients: Vec::new(),
        }
    }

    fn connect(&mut self, id: u32, skew_ms: f64) -> usize {
        self.hub.set_next_connection_id(id);
        let mut client = NetClient::new(
            self.config.clone(),
            self.hub.client(),
            self.clock.skewed(skew_ms),
            DirectoryBuilder::new(),
        )
        .unwrap();
        assert!(client.connect("loopback"));
        self.clients.push(client);
        self.clients.len() - 1
    }

    /// One lockstep round without simulated time passing.
    fn exchange(&mut self) {
        self.server.poll();
        self.server.tick().unwrap();
        for client in &mut self.clients {
            client.poll();
            client.tick().unwrap();
        }
    }

    fn run_for(&mut self, duration_ms: usize) {
        for _ in 0..duration_ms {
            self.server.update().unwrap();
            for client in &mut self.clients {
                client.update().unwrap();
            }
            self.clock.advance(1.0);
        }
    }
}

fn spawned(events: &[ClientEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            ClientEvent::EntitySpawned { entity_id } => Some(*entity_id),
            _ => None,
        })
        .collect()
}

#[test]
fn test_handshake_assigns_id_and_resyncs_in_order() {
    let mut h = Harness::new(NetConfig::default(), LinkConditions::default());
    for _ in 0..3 {
        h.server
            .spawn("crate", None, Transform::default())
            .unwrap();
    }

    let c = h.connect(7, 0.0);
    h.exchange();
    h.exchange();

    let events: Vec<ClientEvent> = h.clients[c].drain_events().collect();
    assert_eq!(events[0], ClientEvent::Connected);
    assert_eq!(
        events[1],
        ClientEvent::Authenticated { connection_id: 7 }
    );
    assert_eq!(spawned(&events), vec![1, 2, 3]);

    // handshake response, then one batch holding all three spawns
    assert_eq!(h.clients[c].stats().packets_received, 2);
    assert_eq!(h.clients[c].local_id(), Some(7));
    assert!(h.clients[c].is_authenticated());
    assert!(h.server.is_authenticated(7));
    assert_eq!(h.server.all_connections().count(), 1);

    let server_events: Vec<ServerEvent> = h.server.drain_events().collect();
    assert_eq!(
        server_events,
        vec![
            ServerEvent::ClientConnected { connection: 7 },
            ServerEvent::ClientAuthenticated { connection: 7 },
        ]
    );
}

#[test]
fn test_player_prefab_spawned_after_resync() {
    let config = NetConfig {
        player_prefab: Some("player".into()),
        ..Default::default()
    };
    let mut h = Harness::new(config, LinkConditions::default());
    h.server.spawn("crate", None, Transform::default()).unwrap();

    let c = h.connect(3, 0.0);
    h.exchange();
    h.exchange();

    let events: Vec<ClientEvent> = h.clients[c].drain_events().collect();
    assert_eq!(spawned(&events), vec![1, 2]);
    let player = h.clients[c].entities().get(2).unwrap();
    assert_eq!(player.prefab, "player");
    assert_eq!(player.owner, Some(3));
}

#[test]
fn test_invalid_config_is_rejected_before_start() {
    let config: NetConfig =
        serde_json::from_str(r#"{ "clock": { "low_delay_fraction": 2.0 } }"#).unwrap();
    let clock = ManualClock::new(0.0);
    let hub = LoopbackHub::new(clock.clone());

    let client = NetClient::new(
        config,
        hub.client(),
        clock.clone(),
        DirectoryBuilder::new(),
    );
    assert!(matches!(client, Err(NetError::InvalidConfig(_))));

    let config = NetConfig {
        max_batch_size: 0,
        ..Default::default()
    };
    let server = NetServer::new(config, hub.server(), clock, DirectoryBuilder::new());
    assert!(matches!(server, Err(NetError::InvalidConfig(_))));
}

#[test]
fn test_authentication_is_monotonic() {
    let mut h = Harness::new(NetConfig::default(), LinkConditions::default());
    let c = h.connect(7, 0.0);
    h.exchange();
    h.exchange();
    h.server.drain_events().for_each(drop);
    h.clients[c].drain_events().for_each(drop);

    h.clients[c]
        .send(
            &HandshakeRequest {
                protocol_version: PROTOCOL_VERSION,
            },
            Channel::Reliable,
            true,
        )
        .unwrap();
    h.server
        .send(7, &HandshakeResponse { connection_id: 99 }, Channel::Reliable, true)
        .unwrap();
    h.exchange();
    h.exchange();

    assert!(h.server.is_authenticated(7));
    assert!(h.clients[c].is_authenticated());
    assert_eq!(h.clients[c].local_id(), Some(7));
    assert_eq!(h.server.drain_events().count(), 0);
    assert!(
        !h.clients[c]
            .drain_events()
            .any(|e| matches!(e, ClientEvent::Authenticated { .. }))
    );
}

#[test]
fn test_protocol_mismatch_is_rejected() {
    let mut h = Harness::new(NetConfig::default(), LinkConditions::default());
    h.hub.set_next_connection_id(4);
    let mut raw = h.hub.client();
    assert!(raw.start("loopback"));
    h.server.poll();

    let mut batch = Writer::new(1500);
    batch.write_u8(1).unwrap();
    pack(
        &HandshakeRequest {
            protocol_version: PROTOCOL_VERSION + 1,
        },
        &mut batch,
    )
    .unwrap();
    raw.send(batch.as_bytes(), Channel::Reliable).unwrap();
    h.server.poll();

    assert!(!h.server.is_authenticated(4));
    assert!(h.server.connection(4).is_none());
    let events: Vec<ServerEvent> = h.server.drain_events().collect();
    assert!(events.contains(&ServerEvent::ConnectionDenied {
        connection: 4,
        reason: DisconnectReason::VersionMismatch,
    }));
    assert!(raw.poll().contains(&TransportEvent::Disconnected(4)));
}

#[test]
fn test_unknown_packet_dropped_on_server() {
    let mut h = Harness::new(NetConfig::default(), LinkConditions::default());
    let c = h.connect(7, 0.0);
    h.exchange();
    h.exchange();

    h.clients[c]
        .send(&Chat { text: "hi".into() }, Channel::Reliable, false)
        .unwrap();
    h.exchange();
    h.exchange();

    assert_eq!(h.server.stats().messages_dropped, 1);
    assert!(h.server.is_authenticated(7));
    assert!(h.clients[c].is_authenticated());
}

#[test]
fn test_unknown_packet_aborts_rest_of_client_batch() {
    let mut h = Harness::new(NetConfig::default(), LinkConditions::default());
    h.server.spawn("crate", None, Transform::default()).unwrap();
    let c = h.connect(7, 0.0);
    h.exchange();
    h.exchange();

    h.server
        .send(7, &Chat { text: "hi".into() }, Channel::Reliable, false)
        .unwrap();
    h.server
        .send(7, &Despawn { entity_id: 1 }, Channel::Reliable, false)
        .unwrap();
    h.exchange();

    assert_eq!(h.clients[c].stats().messages_dropped, 1);
    assert!(h.clients[c].entities().contains(1));
    assert!(h.clients[c].is_authenticated());

    h.server.despawn(1).unwrap();
    h.exchange();
    assert!(!h.clients[c].entities().contains(1));
}

#[test]
fn test_rpc_reaches_known_entities_only() {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);

    let mut directory = DirectoryBuilder::new();
    directory
        .on_rpc(
            "Door.Open",
            move |_: &mut NetServer, call: RpcCall, (force,): (u32,)| {
                seen.borrow_mut()
                    .push((call.sender, call.target.caller_entity, force));
                Ok(())
            },
        )
        .unwrap();

    let mut h = Harness::with_directory(
        NetConfig::default(),
        LinkConditions::default(),
        directory,
    );
    let door = h.server.spawn("door", None, Transform::default()).unwrap();
    let c = h.connect(7, 0.0);
    h.exchange();
    h.exchange();

    h.clients[c]
        .send_rpc(RpcTarget::new("Door.Open", door, 0), &(3u32,), Channel::Reliable)
        .unwrap();
    h.clients[c]
        .send_rpc(RpcTarget::new("Door.Open", 42, 0), &(4u32,), Channel::Reliable)
        .unwrap();
    h.exchange();
    h.exchange();

    assert_eq!(*calls.borrow(), vec![(7, door, 3)]);
    assert_eq!(h.server.stats().messages_dropped, 0);
}

fn two_players(policy: DisconnectPolicy) -> Harness {
    let config = NetConfig {
        player_prefab: Some("player".into()),
        disconnect_policy: policy,
        ..Default::default()
    };
    let mut h = Harness::new(config, LinkConditions::default());
    h.connect(7, 0.0);
    h.exchange();
    h.exchange();
    h.connect(8, 0.0);
    h.exchange();
    h.exchange();
    h.exchange();

    for client in &mut h.clients {
        client.drain_events().for_each(drop);
    }
    h.server.drain_events().for_each(drop);
    h
}

#[test]
fn test_disconnect_despawns_owned_entities() {
    let mut h = two_players(DisconnectPolicy::Despawn);
    assert_eq!(h.server.entities().owned_by(7), vec![1]);
    assert!(h.clients[1].entities().contains(1));

    h.clients[0].disconnect();
    h.exchange();
    h.exchange();

    assert!(h.server.entities().get(1).is_none());
    assert!(h.server.connection(7).is_none());
    assert!(!h.clients[1].entities().contains(1));
    assert!(
        h.clients[1]
            .drain_events()
            .any(|e| e == ClientEvent::EntityDespawned { entity_id: 1 })
    );
    assert!(h.server.drain_events().any(|e| e
        == ServerEvent::ClientDisconnected {
            connection: 7,
            reason: DisconnectReason::Graceful,
        }));
}

#[test]
fn test_disconnect_unowns_entities() {
    let mut h = two_players(DisconnectPolicy::Unown);

    h.server.disconnect(7);
    h.exchange();
    h.exchange();

    assert_eq!(h.server.entities().get(1).unwrap().owner, None);
    assert_eq!(h.clients[1].entities().get(1).unwrap().owner, None);
    assert!(h.clients[1].drain_events().any(|e| e
        == ClientEvent::OwnershipChanged {
            entity_id: 1,
            owner: None,
        }));
    assert!(h.clients[0].drain_events().any(|e| e
        == ClientEvent::Disconnected {
            reason: DisconnectReason::Graceful,
        }));
    assert!(h.clients[0].entities().is_empty());
}

#[test]
fn test_clock_sync_converges_end_to_end() {
    let config = NetConfig {
        ping_interval_ms: 100.0,
        ..Default::default()
    };
    let mut h = Harness::new(
        config,
        LinkConditions {
            min_latency_ms: 30,
            max_latency_ms: 32,
            ..Default::default()
        },
    );
    let c = h.connect(7, -3000.0);
    h.run_for(5000);

    let client = &h.clients[c];
    let offset = client.clock_sync().offset().unwrap();
    assert!((offset - 3000.0).abs() <= 2.0, "offset {}", offset);
    assert!((client.server_time_ms() - h.server.now_ms()).abs() <= 2.0);
    assert!(client.connection().unwrap().rtt_ms().unwrap() >= 60.0);
}

#[test]
fn test_server_authority_replicates_to_client() {
    let mut h = Harness::new(
        NetConfig::default(),
        LinkConditions {
            min_latency_ms: 10,
            max_latency_ms: 10,
            ..Default::default()
        },
    );
    let id = h.server.spawn("crate", None, Transform::default()).unwrap();
    let c = h.connect(7, 0.0);
    h.run_for(500);

    assert!(matches!(
        h.clients[c].set_transform(id, Transform::default()),
        Err(NetError::AuthorityViolation { .. })
    ));

    let mut seen_between = false;
    for step in 1..=100 {
        let x = step as f32 * 0.1;
        h.server
            .set_transform(id, Transform::new(Vec3::X * x, Quat::IDENTITY))
            .unwrap();
        h.run_for(10);

        let rendered = h.clients[c].entities().get(id).unwrap().transform();
        if rendered.position.x > 0.5 && rendered.position.x < 9.5 {
            seen_between = true;
        }
    }
    h.run_for(1000);

    let rendered = h.clients[c].entities().get(id).unwrap().transform();
    assert!(seen_between);
    assert!((rendered.position - Vec3::X * 10.0).length() < 1e-3);
}

#[test]
fn test_client_authority_relayed_and_validated() {
    let config = NetConfig {
        authority_mode: AuthorityMode::Client,
        player_prefab: Some("player".into()),
        ..Default::default()
    };
    let mut h = Harness::new(
        config,
        LinkConditions {
            min_latency_ms: 5,
            max_latency_ms: 5,
            ..Default::default()
        },
    );
    let a = h.connect(7, 0.0);
    h.run_for(100);
    let b = h.connect(8, 0.0);
    h.run_for(100);

    assert_eq!(h.server.entities().get(1).unwrap().owner, Some(7));
    let target = Vec3::new(3.0, 0.0, -2.0);
    let moved = Transform::new(target, Quat::from_rotation_y(0.5));

    h.clients[a].set_transform(1, moved).unwrap();
    assert!(matches!(
        h.clients[b].set_transform(1, moved),
        Err(NetError::AuthorityViolation { entity_id: 1 })
    ));
    assert!(h.server.set_transform(1, moved).is_err());

    let forged = TransformDelta {
        entity_id: 1,
        timestamp_ms: h.clients[b].server_time_ms(),
        position: Some(Vec3::splat(99.0)),
        rotation: None,
    };
    h.clients[b]
        .send(&forged, Channel::Unreliable, false)
        .unwrap();

    h.run_for(1000);

    assert!(h.server.stats().messages_dropped >= 1);
    let on_server = h.server.entities().get(1).unwrap().transform();
    let on_peer = h.clients[b].entities().get(1).unwrap().transform();
    assert!((on_server.position - target).length() < 1e-3);
    assert!((on_peer.position - target).length() < 1e-3);
    assert!(on_peer.rotation.dot(moved.rotation).abs() > 0.9999);
}
