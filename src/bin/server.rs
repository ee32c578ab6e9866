use clap::Parser;
use log::{error, info, warn};
use std::io::Write;
use std::sync::Arc;
use tokio::net::TcpListener;

use rusty_relay::blacklist::{spawn_refresh, Blacklist, IpBlacklist};
use rusty_relay::config::ServerConfig;
use rusty_relay::console::Console;
use rusty_relay::core::server::ServerManager;
use rusty_relay::handlers::serve;

#[derive(Parser, Debug)]
#[command(name = "rusty_relay")]
#[command(about = "Rendezvous and relay server for peers behind restrictive networks", long_about = None)]
struct Args {
    /// Port to listen on (overrides RUSTY_RELAY_PORT)
    port: Option<u16>,

    /// Host address to bind to (overrides RUSTY_RELAY_HOST)
    #[arg(short = 'H', long)]
    host: Option<String>,
}

fn setup_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let tag = match record.level() {
                log::Level::Error => "E",
                log::Level::Warn => "W",
                log::Level::Info => "I",
                log::Level::Debug => "D",
                log::Level::Trace => "T",
            };
            writeln!(
                buf,
                "[{}] [{}] {}",
                chrono::Local::now().format("%d-%m-%Y %H:%M:%S"),
                tag,
                record.args()
            )
        })
        .init();
}

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    setup_logger();

    match dotenv {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    let args = Args::parse();

    let mut config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    let config = Arc::new(config);

    info!(
        "Configuration: host={}, port={}, spam limit={} per {} ms",
        config.host,
        config.port,
        config.spam_limit,
        config.spam_window.as_millis()
    );

    let blacklist: Arc<dyn Blacklist> = Arc::new(IpBlacklist::new(config.blacklist_url.clone()));
    for entry in &config.banned_ips {
        if let Err(e) = blacklist.add(entry).await {
            warn!("Ignoring banned IP: {}", e);
        }
    }
    if config.refresh_blacklist_on_start {
        spawn_refresh(Arc::clone(&blacklist));
    }

    let manager = Arc::new(ServerManager::new(&config, blacklist));

    let listener = match TcpListener::bind((config.host.as_str(), config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Could not bind {}:{}: {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    Console::new(Arc::clone(&manager)).spawn_stdin();

    // Ctrl-C goes through the same graceful path as the exit command
    {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.shutdown().await;
            }
        });
    }

    if let Err(e) = serve(listener, manager, config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    // Give writer tasks a moment to flush the shutdown warning
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    info!("Bye.");

    // stdin reads block a runtime thread; do not wait for them
    std::process::exit(0);
}
