//! The relevo daemon: binds the external socket, runs the manager, and
//! serves the control surface until every worker generation is gone.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relevo::{bind_listener, wait_for_shutdown_signal, Manager};

/// Directory for name-derived config and socket paths.
const VAR_PREFIX: &str = "/var/run/relevo";

#[derive(Parser)]
#[command(name = "relevo", version, about = "Zero-downtime process supervisor")]
struct Args {
    /// External address to bind, e.g. "tcp://:8080" or "unix:///run/app.sock".
    #[arg(long, env = "RELEVO_ADDR")]
    addr: String,

    /// Path to the process config file.
    #[arg(long, env = "RELEVO_CONF")]
    conf: Option<PathBuf>,

    /// Control socket path.
    #[arg(long, env = "RELEVO_SOCK")]
    sock: Option<PathBuf>,

    /// Daemon name; used to infer --conf and --sock when not given.
    #[arg(long, env = "RELEVO_NAME")]
    name: Option<String>,
}

fn resolve_path(
    explicit: Option<PathBuf>,
    name: &Option<String>,
    extension: &str,
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(name) = name {
        return Ok(PathBuf::from(VAR_PREFIX).join(format!("{name}.{extension}")));
    }
    anyhow::bail!("missing required flag: --{extension} or --name");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let conf = resolve_path(args.conf, &args.name, "conf")?;
    let sock = resolve_path(args.sock, &args.name, "sock")?;

    let bind = bind_listener(&args.addr).context("binding the external address")?;

    // Fail early when the config path cannot be written: promotion
    // would otherwise fail much later.
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&conf)
        .with_context(|| format!("config file {} is not writable", conf.display()))?;

    let listener = UnixListener::bind(&sock)
        .with_context(|| format!("binding control socket {}", sock.display()))?;

    info!(addr = %args.addr, conf = %conf.display(), sock = %sock.display(), "relevo starting");

    let manager = Manager::new(conf, bind);
    let handle = manager.handle();

    // SIGHUP restarts with the persisted configuration.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut hup) = signal(SignalKind::hangup()) else {
                return;
            };
            while hup.recv().await.is_some() {
                info!("SIGHUP received, restarting the worker");
                if let Err(e) = handle.reload().await {
                    warn!(error = %e, "reload failed");
                }
            }
        });
    }

    // SIGTERM/SIGINT drain every generation and let the manager finish.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if wait_for_shutdown_signal().await.is_ok() {
                info!("termination signal received, shutting down");
                handle.shutdown();
            }
        });
    }

    let token = CancellationToken::new();
    tokio::spawn(relevo::rpc::serve(listener, handle, token.clone()));

    manager.run().await;

    token.cancel();
    let _ = std::fs::remove_file(&sock);
    info!("bye");
    Ok(())
}
