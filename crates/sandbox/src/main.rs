//! Headless session over the simulated loopback network: one server, a few
//! clients, a scripted amount of motion, and a summary at the end.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use glam::{Quat, Vec3};

use hybridnet::{
    AuthorityMode, Channel, ClientEvent, DirectoryBuilder, LinkConditions, LoopbackHub,
    ManualClock, NetClient, NetConfig, NetServer, RpcCall, RpcTarget, ServerEvent, Transform,
};

#[derive(Parser)]
#[command(name = "hybridnet-sandbox")]
#[command(about = "Run a simulated hybridnet session")]
struct Args {
    #[arg(short, long, help = "JSON file with NetConfig overrides")]
    config: Option<PathBuf>,

    #[arg(short = 'n', long, default_value_t = 2)]
    clients: usize,

    #[arg(short, long, default_value_t = 5.0, help = "Simulated seconds to run")]
    seconds: f64,

    #[arg(long, help = "Let clients write their own player transforms")]
    client_authority: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,

    #[arg(long, default_value_t = 1, help = "Seed for the simulated link")]
    seed: u64,

    #[arg(long, help = "Print the summary as JSON")]
    json: bool,
}

fn load_config(args: &Args) -> Result<NetConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => NetConfig::default(),
    };

    if args.client_authority {
        config.authority_mode = AuthorityMode::Client;
    }
    if config.player_prefab.is_none() {
        config.player_prefab = Some("player".into());
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.clients == 0 {
        bail!("at least one client is required");
    }

    let config = load_config(&args)?;
    let conditions = LinkConditions {
        loss_percent: args.loss_percent,
        min_latency_ms: args.min_latency,
        max_latency_ms: args.max_latency.max(args.min_latency),
        jitter_ms: args.jitter,
    };

    let clock = ManualClock::new(0.0);
    let hub = LoopbackHub::with_conditions(clock.clone(), conditions, args.seed);

    let mut directory = DirectoryBuilder::new();
    directory.on_rpc("Sandbox.Wave", |_: &mut NetServer, call: RpcCall, (count,): (u32,)| {
        log::info!(
            "connection {} waved {} times from entity {}",
            call.sender,
            count,
            call.target.caller_entity
        );
        Ok(())
    })?;

    let mut server = NetServer::new(config.clone(), hub.server(), clock.clone(), directory)?;
    server.start(true)?;
    let beacon = server.spawn("beacon", None, Transform::default())?;

    let mut clients = Vec::with_capacity(args.clients);
    for i in 0..args.clients {
        // each client's clock starts somewhere else
        let skew = -250.0 * (i as f64 + 1.0);
        let mut client = NetClient::new(
            config.clone(),
            hub.client(),
            clock.skewed(skew),
            DirectoryBuilder::new(),
        )?;
        if !client.connect("loopback") {
            bail!("client {} could not connect", i);
        }
        clients.push(client);
    }

    let total_ms = (args.seconds * 1000.0) as u64;
    let mut waved = vec![false; clients.len()];
    for step in 0..total_ms {
        let now = step as f32 / 1000.0;

        server.update()?;
        // unowned, so the server writes it in either authority mode
        let orbit = Vec3::new(now.cos() * 4.0, 0.0, now.sin() * 4.0);
        server.set_transform(beacon, Transform::new(orbit, Quat::from_rotation_y(now)))?;
        for event in server.drain_events() {
            match event {
                ServerEvent::ClientAuthenticated { connection } => {
                    log::info!("client {} joined", connection)
                }
                ServerEvent::ClientDisconnected { connection, reason } => {
                    log::info!("client {} {}", connection, reason.as_str())
                }
                ServerEvent::ConnectionDenied { connection, reason } => {
                    log::warn!("client {} denied: {}", connection, reason.as_str())
                }
                ServerEvent::Error { message } => log::error!("{}", message),
                ServerEvent::ClientConnected { .. } => {}
            }
        }

        for (index, client) in clients.iter_mut().enumerate() {
            client.update()?;
            for event in client.drain_events() {
                if let ClientEvent::Error { message } = event {
                    log::error!("client {}: {}", index, message);
                }
            }

            let Some(local_id) = client.local_id() else {
                continue;
            };
            let owned: Vec<_> = client
                .entities()
                .iter()
                .filter(|e| e.owner == Some(local_id))
                .map(|e| e.id)
                .collect();

            if client.config().authority_mode == AuthorityMode::Client {
                let offset = index as f32 * 2.0;
                let position = Vec3::new(offset, 0.0, now.sin() * 3.0);
                for &id in &owned {
                    client.set_transform(id, Transform::new(position, Quat::IDENTITY))?;
                }
            }

            if !waved[index] {
                if let Some(&player) = owned.first() {
                    client.send_rpc(
                        RpcTarget::new("Sandbox.Wave", player, 0),
                        &(index as u32 + 1,),
                        Channel::Reliable,
                    )?;
                    waved[index] = true;
                }
            }
        }

        clock.advance(1.0);
    }

    print_summary(&args, &server, &clients)?;

    for client in &mut clients {
        client.disconnect();
    }
    server.stop();
    Ok(())
}

fn print_summary(args: &Args, server: &NetServer, clients: &[NetClient]) -> Result<()> {
    let server_now = server.now_ms();
    let stats = server.stats();

    let client_rows: Vec<serde_json::Value> = clients
        .iter()
        .map(|client| {
            let error_ms = client
                .clock_sync()
                .offset()
                .map(|_| client.server_time_ms() - server_now);
            serde_json::json!({
                "connection": client.local_id(),
                "offset_ms": client.clock_sync().offset(),
                "clock_error_ms": error_ms,
                "rtt_ms": client.connection().and_then(|c| c.rtt_ms()),
                "entities": client.entities().len(),
                "messages_dispatched": client.stats().messages_dispatched,
                "messages_dropped": client.stats().messages_dropped,
            })
        })
        .collect();

    let summary = serde_json::json!({
        "ticks": server.current_tick(),
        "entities": server.entities().len(),
        "connections": server.all_connections().count(),
        "packets_sent": stats.packets_sent,
        "bytes_sent": stats.bytes_sent,
        "packets_received": stats.packets_received,
        "messages_dispatched": stats.messages_dispatched,
        "messages_dropped": stats.messages_dropped,
        "clients": client_rows,
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "{} ticks, {} entities, {} connections",
        server.current_tick(),
        server.entities().len(),
        server.all_connections().count()
    );
    println!(
        "server sent {} packets ({} bytes), dispatched {} messages, dropped {}",
        stats.packets_sent, stats.bytes_sent, stats.messages_dispatched, stats.messages_dropped
    );
    for client in clients {
        println!(
            "  client {:?}: offset {:?}ms, rtt {:?}ms, {} entities",
            client.local_id(),
            client.clock_sync().offset(),
            client.connection().and_then(|c| c.rtt_ms()),
            client.entities().len()
        );
    }
    Ok(())
}
