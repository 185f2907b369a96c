mod config;

use std::io::{self, BufRead};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use config::ServerConfig;
use tether::{
    Channel, ConnectionHandle, NetConfig, NetworkSelector, Packet, PacketDispatch,
    ProcessingScheduler, ShutdownHandle, WorkerPool,
};

#[derive(Parser)]
#[command(name = "tether-server")]
#[command(about = "Headless TCP/UDP echo host")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    #[arg(short, long, default_value_t = tether::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    #[arg(short, long, default_value_t = 1024)]
    max_connections: usize,

    #[arg(long, default_value_t = tether::MAX_PACKET_SIZE, help = "Largest accepted TCP payload in bytes")]
    max_packet_size: usize,

    #[arg(long, default_value_t = 4 * tether::MAX_PACKET_SIZE, help = "Unsent bytes a peer may fall behind before it is dropped")]
    max_pending_write_bytes: usize,

    #[arg(long = "port-check-host", help = "Host whose TCP connections get a port-check reply (repeatable)")]
    port_check_hosts: Vec<IpAddr>,
}

fn echo(_: &(), conn: &Arc<ConnectionHandle>, packet: Packet) {
    log::debug!(
        "{}: {} byte {:?} packet",
        conn,
        packet.len(),
        packet.channel
    );
    let result = match packet.channel {
        Channel::Reliable => conn.send_reliable(packet.payload),
        Channel::Unreliable => conn.send_unreliable(packet.payload),
    };
    if let Err(e) = result {
        log::warn!("{}: echo failed: {}", conn, e);
    }
}

fn watch_stdin(shutdown: ShutdownHandle) {
    let spawned = thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim() == "quit" => break,
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
            log::info!("Quit requested");
            shutdown.shutdown();
        });
    if let Err(e) = spawned {
        log::warn!("Failed to start stdin watcher: {}", e);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = SocketAddr::new(args.bind, args.port);

    let config = ServerConfig {
        workers: args.workers,
        net: NetConfig {
            max_connections: args.max_connections,
            max_packet_size: args.max_packet_size,
            max_pending_write_bytes: args.max_pending_write_bytes,
            ..Default::default()
        },
        ..Default::default()
    }
    .with_port_check_hosts(args.port_check_hosts);

    let dispatch: Arc<dyn PacketDispatch<()>> = Arc::new(echo);
    let pool = Arc::new(WorkerPool::new(config.workers, Arc::new(()), dispatch));
    let scheduler: Arc<dyn ProcessingScheduler> = pool.clone();

    let selector = NetworkSelector::bind(bind_addr, config.net.clone(), scheduler)
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    log::info!(
        "Server started on {} with {} workers",
        selector.local_addr(),
        pool.worker_count()
    );

    watch_stdin(selector.shutdown_handle());
    let stats = selector.run();
    log::info!(
        "Served {} connections ({} refused, {} protocol violations)",
        stats.connections_accepted,
        stats.connections_refused,
        stats.protocol_violations
    );

    if !pool.shutdown(config.shutdown_timeout) {
        log::warn!("Packet workers did not finish within {:?}", config.shutdown_timeout);
    }
    log::info!("Server shutting down");
    Ok(())
}
