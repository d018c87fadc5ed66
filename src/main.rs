use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info};

use yada::cds::ContentTree;
use yada::config::Config;
use yada::error::ServerError;
use yada::media::{self, ExtensionProbe, Md5Hash};
use yada::ssdp::SsdpEngine;
use yada::state::AppState;
use yada::{logging, web};

#[derive(Parser, Debug)]
#[command(name = "yada", version, about = "A DLNA/UPnP AV MediaServer")]
struct Args {
    /// Directory of media files to share
    share_dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, default_value = "yada.toml")]
    config: PathBuf,

    /// Override the configured TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the advertised friendly name
    #[arg(short, long)]
    name: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("{e}");
        eprintln!("yada: {e}");
        std::process::exit(e.return_code());
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    logging::init(args.debug).map_err(|e| ServerError::Init(e.to_string()))?;

    let mut config = Config::load_or_create(&args.config)
        .map_err(|e| ServerError::Init(e.to_string()))?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(name) = args.name {
        config.server.announce_as = name;
    }
    let config = Arc::new(config);

    info!("starting {} (uuid {})", config.server.announce_as, config.server.uuid);

    let mut tree = ContentTree::new(Arc::new(Md5Hash));
    if let Some(share_dir) = &args.share_dir {
        let count = media::scan_share(&mut tree, share_dir, &ExtensionProbe)
            .await
            .map_err(|e| ServerError::Share(e.to_string()))?;
        info!("sharing {count} items from {}", share_dir.display());
    }

    // Bind before anything is advertised: with port 0 the kernel picks,
    // and SSDP must announce the real port.
    let ip = config.bind_ip();
    let listener = TcpListener::bind((ip, config.server.port))
        .await
        .map_err(|e| ServerError::Init(format!("could not bind {ip}: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| ServerError::Init(e.to_string()))?
        .port();
    info!("HTTP server listening on {ip}:{port}");

    let state = AppState {
        config: config.clone(),
        tree: Arc::new(RwLock::new(tree)),
        host: ip.to_string(),
        port,
    };

    let ssdp = SsdpEngine::start(&state)
        .await
        .map_err(|e| ServerError::Init(e.to_string()))?;

    let mut server = tokio::spawn(web::serve(listener, state));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        result = &mut server => {
            ssdp.shutdown().await;
            return Err(ServerError::Init(format!("HTTP server failed: {result:?}")));
        }
    }

    // Teardown order: advertiser, listener, final byebye, then the HTTP
    // server.
    ssdp.shutdown().await;
    server.abort();
    Ok(())
}
