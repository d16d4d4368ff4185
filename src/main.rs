//! echo-client-demo: TCP/UDP echo-client workloads
//!
//! Brings up the configured network endpoints, then runs pools of echo
//! clients against an echo server:
//! - Each worker connects, sends numbered messages and verifies every echo
//! - Mismatches, timeouts and errors restart the connection after a delay
//! - All output goes through a non-blocking, drop-on-full log queue
//!
//! Features:
//! - TCP and UDP echo clients, each with its own worker pool
//! - Optional in-process echo server for self-contained runs
//! - Periodic per-worker counter reports
//! - Configuration via CLI arguments or TOML file

mod config;
mod echo;
mod fatal;
mod logging;
mod network;
mod server;
mod task;

use config::Config;
use echo::{EchoEngine, EngineError, SocketConnector, Transport};
use logging::{LogWriter, StdoutOutput};
use network::{Bootstrap, HostNetwork};
use server::EchoServer;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Start the log sink first so every task can log from the outset
    logging::global().initialize(config.log_config(), StdoutOutput)?;

    // Initialize tracing; the log sink stamps each message
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(LogWriter::new(logging::global()))
        .init();

    fatal::install_panic_hook();

    info!(
        server = %config.tcp_echo.server,
        port = config.tcp_echo.port,
        tcp_workers = config.tcp_echo.workers,
        udp_workers = config.udp_echo.workers,
        cycles = config.tcp_echo.cycles,
        serve = ?config.serve,
        "Starting echo-client-demo"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("demo-runtime")
        .build()?;

    if let Some(ref listen) = config.serve {
        let addr: SocketAddr = listen.parse()?;
        let server = runtime.block_on(EchoServer::bind(addr))?;
        runtime.spawn(server.serve());
    }

    let endpoints = network::parse_endpoints(&config.network.endpoints)?;
    let mut network = HostNetwork::new(
        endpoints.clone(),
        Duration::from_millis(config.network.link_poll_interval_ms),
    );

    let mut started = None;
    {
        let mut bootstrap = Bootstrap::new(config.network.hostname.clone(), endpoints.len(), || {
            started = Some(start_engines(&config));
        });
        info!(endpoints = endpoints.len(), "Waiting for endpoints");
        network.bring_up(&mut bootstrap);

        let addresses = network.lookup(&bootstrap, &config.network.hostname);
        info!(
            hostname = %config.network.hostname,
            addresses = ?addresses,
            "Answering name queries"
        );
    }

    let engines = match started {
        Some(result) => result?,
        None => return Err("workloads did not start".into()),
    };

    if config.report.interval_secs == 0 {
        runtime.block_on(std::future::pending::<()>());
    } else {
        runtime.block_on(report_task(engines, config.report.interval_secs));
    }
    Ok(())
}

/// Start every enabled echo client.
fn start_engines(config: &Config) -> Result<Vec<EchoEngine>, EngineError> {
    let mut engines = Vec::new();

    for (transport, echo) in [
        (Transport::Tcp, &config.tcp_echo),
        (Transport::Udp, &config.udp_echo),
    ] {
        if echo.workers == 0 {
            info!(%transport, "Echo client disabled");
            continue;
        }
        let engine_config = echo.engine_config(transport);
        engines.push(EchoEngine::start(&engine_config, SocketConnector::new(transport))?);
    }

    Ok(engines)
}

/// Periodically print every worker's counters
async fn report_task(engines: Vec<EchoEngine>, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick completes immediately
    interval.tick().await;

    loop {
        interval.tick().await;
        for engine in &engines {
            for stats in engine.stats() {
                crate::log_printf!(
                    "{} echo {}: cycles {} failures {} connections {}",
                    engine.transport(),
                    stats.index,
                    stats.cycles,
                    stats.failures,
                    stats.connections
                );
            }
        }
    }
}
