//! Control surface end to end: JSON lines over a real Unix socket.

use std::time::Duration;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use relevo::rpc::api::{
    Envelope, InfoReply, KillQuery, ProcessQuery, PsReply, Request, StartQuery, StartReply,
};
use relevo::rpc::{self, ControlClient};
use relevo::{bind_listener, Manager};

fn sh(script: &str) -> Vec<String> {
    vec!["/bin/sh".into(), "-c".into(), script.into()]
}

struct Control {
    client: ControlClient,
    token: CancellationToken,
    run: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn connect() -> Control {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("control.sock");
    let conf = dir.path().join("worker.conf");

    let bind = bind_listener("tcp://127.0.0.1:0").unwrap();
    let manager = Manager::new(conf, bind);
    let handle = manager.handle();
    let run = tokio::spawn(manager.run());

    let listener = UnixListener::bind(&sock).unwrap();
    let token = CancellationToken::new();
    tokio::spawn(rpc::serve(listener, handle, token.clone()));

    let client = ControlClient::connect(&sock).await.unwrap();
    Control {
        client,
        token,
        run,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_info_round_trip() {
    let mut control = connect().await;

    let envelope: Envelope<InfoReply> = control.client.call(&Request::Info).await.unwrap();
    assert!(envelope.ok);
    let info = envelope.data.unwrap();
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(info.instances, 0);

    control.token.cancel();
}

#[tokio::test]
async fn test_run_ps_and_kill_over_the_socket() {
    let mut control = connect().await;

    let envelope: Envelope<StartReply> = control
        .client
        .call(&Request::Run(StartQuery {
            command: sh("trap 'exit 0' TERM; echo READY=1 >&4; while :; do sleep 0.1; done"),
            wait: true,
            ..StartQuery::default()
        }))
        .await
        .unwrap();
    assert!(envelope.ok, "run failed: {:?}", envelope.error);

    let envelope: Envelope<PsReply> = control
        .client
        .call(&Request::Ps(ProcessQuery::default()))
        .await
        .unwrap();
    let reply = envelope.data.unwrap();
    assert_eq!(reply.processes.len(), 1);
    assert_eq!(reply.processes[0].state, "ready");
    assert!(reply.processes[0].pid.unwrap() > 0);

    // Retire it through the control surface and wait for the exit.
    let envelope: Envelope<relevo::rpc::api::KillReply> = control
        .client
        .call(&Request::Kill(KillQuery {
            query: ProcessQuery {
                ready: true,
                ..ProcessQuery::default()
            },
            signal: None,
            wait: true,
        }))
        .await
        .unwrap();
    assert!(envelope.ok);

    tokio::time::timeout(Duration::from_secs(10), control.run)
        .await
        .expect("manager did not finish")
        .unwrap();
    control.token.cancel();
}

#[tokio::test]
async fn test_failed_waited_run_reports_the_exit_code() {
    let mut control = connect().await;

    let envelope: Envelope<StartReply> = control
        .client
        .call(&Request::Run(StartQuery {
            command: sh("exit 9"),
            wait: true,
            ..StartQuery::default()
        }))
        .await
        .unwrap();

    assert!(!envelope.ok);
    assert_eq!(envelope.data.unwrap().code, Some(9));
    assert!(envelope.error.unwrap().contains("before becoming ready"));

    control.token.cancel();
}

#[tokio::test]
async fn test_run_without_any_command_is_rejected() {
    let mut control = connect().await;

    // No command in the request and none persisted: rejected with a
    // descriptive error envelope, not a dropped connection.
    let envelope: Envelope<StartReply> = control
        .client
        .call(&Request::Run(StartQuery::default()))
        .await
        .unwrap();
    assert!(!envelope.ok);
    assert!(envelope.error.unwrap().contains("command is missing"));

    control.token.cancel();
}
