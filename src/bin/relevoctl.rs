//! Control CLI for a running relevo daemon.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use relevo::rpc::api::{
    Envelope, InfoReply, KillQuery, KillReply, ProcessQuery, PsReply, Request, StartQuery,
    StartReply,
};
use relevo::rpc::ControlClient;

const VAR_PREFIX: &str = "/var/run/relevo";

#[derive(Parser)]
#[command(name = "relevoctl", version, about = "Control a running relevo daemon")]
struct Cli {
    /// Control socket path.
    #[arg(long, env = "RELEVO_SOCK")]
    sock: Option<PathBuf>,

    /// Daemon name; used to infer --sock when not given.
    #[arg(long, env = "RELEVO_NAME")]
    name: Option<String>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Start (or replace) the worker process.
    Run {
        /// Start timeout in milliseconds (0 = no timeout).
        #[arg(long)]
        start_timeout: Option<u64>,
        /// Stop timeout in milliseconds (0 = no timeout).
        #[arg(long)]
        stop_timeout: Option<u64>,
        /// Working directory for the worker.
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Wait until the worker is ready.
        #[arg(long)]
        wait: bool,
        /// Worker command, after `--`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// List supervised processes.
    Ps {
        /// Only the starting process.
        #[arg(long)]
        starting: bool,
        /// Only the ready (serving) process.
        #[arg(long)]
        ready: bool,
        /// Only processes shutting down.
        #[arg(long)]
        stopping: bool,
        /// Only the process with this pid.
        #[arg(long)]
        pid: Option<i32>,
    },
    /// Send a signal to matching processes.
    Kill {
        #[arg(long)]
        starting: bool,
        #[arg(long)]
        ready: bool,
        #[arg(long)]
        stopping: bool,
        #[arg(long)]
        pid: Option<i32>,
        /// Signal to send.
        #[arg(long, default_value = "TERM")]
        signal: String,
        /// Wait for the matched processes to exit.
        #[arg(long)]
        wait: bool,
    },
    /// Show daemon metadata.
    Info,
}

fn resolve_sock(explicit: Option<PathBuf>, name: &Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Some(name) = name {
        return Ok(PathBuf::from(VAR_PREFIX).join(format!("{name}.sock")));
    }
    anyhow::bail!("missing required flag: --sock or --name");
}

/// Prints the envelope error and exits non-zero; a failed waited run
/// propagates the worker's exit code.
fn check<T>(envelope: Envelope<T>, code: Option<i32>) -> T {
    if envelope.ok {
        if let Some(data) = envelope.data {
            return data;
        }
    }
    eprintln!(
        "ERROR: {}",
        envelope.error.unwrap_or_else(|| "malformed response".into())
    );
    std::process::exit(code.unwrap_or(1));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let sock = resolve_sock(cli.sock, &cli.name)?;
    let mut client = ControlClient::connect(&sock)
        .await
        .with_context(|| format!("couldn't connect to {}", sock.display()))?;

    match cli.command {
        Cmd::Run {
            start_timeout,
            stop_timeout,
            cwd,
            wait,
            command,
        } => {
            let query = StartQuery {
                command,
                cwd,
                start_timeout,
                stop_timeout,
                wait,
            };
            let envelope: Envelope<StartReply> = client.call(&Request::Run(query)).await?;
            let code = envelope.data.as_ref().and_then(|reply| reply.code);
            check(envelope, code);
        }
        Cmd::Ps {
            starting,
            ready,
            stopping,
            pid,
        } => {
            let query = ProcessQuery {
                starting,
                ready,
                stopping,
                pid,
            };
            let envelope: Envelope<PsReply> = client.call(&Request::Ps(query)).await?;
            let reply = check(envelope, None);
            for p in reply.processes {
                let pid = p.pid.map_or_else(|| "-".into(), |pid| pid.to_string());
                let rss = p
                    .usage
                    .map_or_else(|| "-".into(), |u| format!("{}", u.rss_bytes));
                println!("#{} pid={pid} state={} rss={rss} command={:?}", p.id, p.state, p.command);
            }
        }
        Cmd::Kill {
            starting,
            ready,
            stopping,
            pid,
            signal,
            wait,
        } => {
            let query = KillQuery {
                query: ProcessQuery {
                    starting,
                    ready,
                    stopping,
                    pid,
                },
                signal: Some(signal),
                wait,
            };
            let envelope: Envelope<KillReply> = client.call(&Request::Kill(query)).await?;
            check(envelope, None);
        }
        Cmd::Info => {
            let envelope: Envelope<InfoReply> = client.call(&Request::Info).await?;
            let reply = check(envelope, None);
            println!("version: {}", reply.version);
            println!("build: {}", reply.build);
            println!("instances: {}", reply.instances);
        }
    }
    Ok(())
}
