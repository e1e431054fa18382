use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use voxelmux::announce::NoOpAnnouncer;
use voxelmux::auth::FileAuthBackend;
use voxelmux::{announce, config, listen, logging, telnet};

#[derive(Parser, Debug)]
#[command(name = "proxy", about = "Voxel-game reverse proxy")]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the auth backend's JSON store.
    #[arg(long, default_value = "auth.json")]
    auth: PathBuf,

    /// Default tracing filter directive.
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init_logging(&args.log);

    let cfg = match config::load_from_path(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, path = ?args.config, "failed to load config, using defaults");
            config::Config::default()
        }
    };
    config::replace(cfg);
    let cfg = config::current();

    let auth_backend: Arc<dyn voxelmux::auth::AuthBackend> = match FileAuthBackend::load(&args.auth) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            error!(error = %e, path = ?args.auth, "failed to load auth backend");
            std::process::exit(1);
        }
    };

    let announcer: Arc<dyn voxelmux::announce::ServerListAnnouncer> = Arc::new(NoOpAnnouncer);
    tokio::spawn(announce::run(announcer, cfg.clone()));

    let telnet_addr = cfg.telnet_addr.clone();
    let telnet_auth = auth_backend.clone();
    tokio::spawn(async move {
        if let Err(e) = telnet::serve(&telnet_addr, telnet_auth).await {
            error!(error = %e, "telnet console stopped");
        }
    });

    info!("starting proxy");
    tokio::select! {
        res = listen::serve(cfg, auth_backend) => {
            if let Err(e) = res {
                error!(error = %e, "listener stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down on ctrl-c");
        }
    }
}
