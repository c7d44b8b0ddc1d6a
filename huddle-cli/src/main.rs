//! huddle: join a live stream and print its roster as it changes.
//!
//! ```text
//! RUST_LOG=info huddle live.example.com --stream my-stream --token $HUDDLE_TOKEN
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use huddle_link::{
    ClientConfig, ConnectionManager, CredentialResolver, NoCredentials, StaticEnvironment,
    StaticToken, WsConnector,
};

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Live stream presence client")]
struct Args {
    /// Realtime host, optionally with port. Overrides the config file.
    host: Option<String>,

    /// Stream to join.
    #[arg(long, short)]
    stream: String,

    /// JSON config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Session token.
    #[arg(long, env = "HUDDLE_TOKEN")]
    token: Option<String>,

    /// Local user id, used when no token is available.
    #[arg(long)]
    user_id: Option<String>,

    /// Use ws:// instead of wss://.
    #[arg(long)]
    insecure: bool,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig, huddle_link::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)?,
            None => ClientConfig::default(),
        };
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if self.insecure {
            config.secure = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = match args.client_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!("Joining {} on {}", args.stream, config.host);

    let resolver: Arc<dyn CredentialResolver> = match args.token.clone() {
        Some(token) => Arc::new(StaticToken(token)),
        None => Arc::new(NoCredentials),
    };
    let mut env = StaticEnvironment::new();
    if let Some(user_id) = &args.user_id {
        env = env.with_profile(serde_json::json!({ "user_id": user_id }));
    }

    let manager = ConnectionManager::new(config, Arc::new(WsConnector), resolver, Arc::new(env));
    let mut view = manager.watch();
    let mut events = manager.subscribe_events();

    manager.connect(args.stream.clone()).await;

    let mut last = view.borrow_and_update().clone();
    println!("state: {}", last.state);
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow_and_update().clone();
                if current.state != last.state {
                    println!("state: {}", current.state);
                }
                if current.roster != last.roster {
                    let names: Vec<&str> = current
                        .roster
                        .iter()
                        .map(|p| if p.name.is_empty() { p.user_id.as_str() } else { p.name.as_str() })
                        .collect();
                    println!("roster ({}): {}", names.len(), names.join(", "));
                }
                last = current;
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}: {}", event.kind, event.payload),
                Err(RecvError::Lagged(n)) => warn!("Skipped {n} relayed events"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving {}", args.stream);
                manager.disconnect().await;
                break;
            }
        }
    }

    let stats = manager.stats();
    info!(
        "frames in {}, out {}, reconnects {}, malformed {}",
        stats.frames_in, stats.frames_out, stats.reconnects, stats.malformed_dropped
    );
}
