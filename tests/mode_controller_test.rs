//! Integration tests for the mode controller: upload, shell, execute

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use rustcat::config::{Behavior, Config, Role, SessionConfig};
use rustcat::mode::{
    LocalReader, LocalWriter, ModeController, ProcessExit, ProcessSpec, SessionReport,
    ShellBackend, ShellProcess,
};
use rustcat::{CatError, Connection, ShutdownCoordinator};

async fn connected_pair() -> (Connection, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let peer = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
    let (accepted, _) = listener.accept().await.unwrap();
    let peer = peer.await.unwrap();
    (Connection::from_stream(accepted).unwrap(), peer)
}

fn session(behavior: Behavior) -> SessionConfig {
    let mut config = Config::default();
    config.relay.buffer_size = 1024;
    config.shell.terminate_grace = Duration::from_millis(500);
    SessionConfig {
        host: "127.0.0.1".to_string(),
        port: 5555,
        role: Role::Listen,
        behavior,
        relay: config.relay,
        shell: config.shell,
        upload: config.upload,
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

/// Send `data`, half-close, and collect everything the receiver sends back
async fn send_and_collect(mut peer: TcpStream, data: Vec<u8>) -> Vec<u8> {
    peer.write_all(&data).await.unwrap();
    peer.shutdown().await.unwrap();
    let mut reply = Vec::new();
    peer.read_to_end(&mut reply).await.unwrap();
    reply
}

async fn upload_roundtrip(len: usize) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(format!("upload-{}.bin", len));
    let controller = ModeController::new(session(Behavior::Upload { path: path.clone() })).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, peer) = connected_pair().await;
    let data = payload(len);
    let sender = tokio::spawn(send_and_collect(peer, data.clone()));

    let report = timeout(
        Duration::from_secs(10),
        controller.handle(connection, coordinator.subscribe()),
    )
    .await
    .expect("upload should finish")
    .unwrap();

    match report {
        SessionReport::Uploaded(upload) => {
            assert_eq!(upload.bytes, len as u64);
            assert_eq!(upload.path, path);
        }
        other => panic!("unexpected report: {:?}", other),
    }

    let written = std::fs::read(&path).unwrap();
    assert_eq!(written.len(), len);
    assert_eq!(written, data);

    let ack = sender.await.unwrap();
    assert_eq!(
        String::from_utf8(ack).unwrap(),
        format!("Saved file {}\n", path.display())
    );
}

#[tokio::test]
async fn test_upload_empty_file() {
    upload_roundtrip(0).await;
}

#[tokio::test]
async fn test_upload_exactly_one_buffer() {
    upload_roundtrip(1024).await;
}

#[tokio::test]
async fn test_upload_one_buffer_plus_one() {
    upload_roundtrip(1025).await;
}

#[tokio::test]
async fn test_upload_large_file() {
    upload_roundtrip(750_000).await;
}

#[tokio::test]
async fn test_upload_without_acknowledgement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quiet.bin");
    let mut config = session(Behavior::Upload { path: path.clone() });
    config.upload.acknowledge = false;
    let controller = ModeController::new(config).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, peer) = connected_pair().await;
    let sender = tokio::spawn(send_and_collect(peer, b"quiet".to_vec()));

    let report = controller.handle(connection, coordinator.subscribe()).await.unwrap();
    assert!(matches!(report, SessionReport::Uploaded(ref u) if u.bytes == 5));
    assert!(sender.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_reset_is_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cut.bin");
    let controller = ModeController::new(session(Behavior::Upload { path: path.clone() })).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, mut peer) = connected_pair().await;
    let handle = tokio::spawn(async move {
        controller.handle(connection, coordinator.subscribe()).await
    });

    peer.write_all(&payload(4096)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    #[allow(deprecated)]
    peer.set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);

    let result = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    match result {
        Err(CatError::IncompleteTransfer { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected an incomplete transfer, got {:?}", other),
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_upload_write_failure_is_not_acknowledged() {
    let path = PathBuf::from("/dev/full");
    let mut config = session(Behavior::Upload { path: path.clone() });
    config.upload.overwrite = true;
    let controller = ModeController::new(config).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, mut peer) = connected_pair().await;
    let sender = tokio::spawn(async move {
        // The receiver may close mid-stream, so send and read errors are expected
        let _ = peer.write_all(&payload(256 * 1024)).await;
        let _ = peer.shutdown().await;
        let mut reply = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match peer.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => reply.extend_from_slice(&buf[..n]),
            }
        }
        reply
    });

    let result = timeout(
        Duration::from_secs(10),
        controller.handle(connection, coordinator.subscribe()),
    )
    .await
    .expect("a failed write must end the upload");

    match result {
        Err(CatError::Write { direction, .. }) => {
            assert_eq!(direction, rustcat::relay::Direction::Downstream)
        }
        other => panic!("expected a write error, got {:?}", other),
    }

    let reply = timeout(Duration::from_secs(5), sender).await.unwrap().unwrap();
    assert!(
        reply.is_empty(),
        "peer must not be told the upload was saved: {:?}",
        String::from_utf8_lossy(&reply)
    );
}

#[tokio::test]
async fn test_upload_into_missing_directory_is_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("file.bin");
    let controller = ModeController::new(session(Behavior::Upload { path })).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, _peer) = connected_pair().await;
    let err = controller
        .handle(connection, coordinator.subscribe())
        .await
        .unwrap_err();
    assert!(matches!(err, CatError::Write { .. }), "got {:?}", err);
    assert_eq!(err.exit_code(), rustcat::error::EXIT_RELAY_IO);
}

#[tokio::test]
async fn test_upload_onto_directory_is_write_error() {
    let dir = tempfile::tempdir().unwrap();
    let controller = ModeController::new(session(Behavior::Upload {
        path: dir.path().to_path_buf(),
    }))
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, _peer) = connected_pair().await;
    let err = controller
        .handle(connection, coordinator.subscribe())
        .await
        .unwrap_err();
    assert!(matches!(err, CatError::Write { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_upload_to_existing_file_fails_before_io() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exists.bin");
    std::fs::write(&path, b"keep me").unwrap();

    let result = ModeController::new(session(Behavior::Upload { path: path.clone() }));
    assert!(matches!(result, Err(CatError::Configuration(_))));
    assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_shell_relays_through_echoing_command() {
    let controller = ModeController::new(session(Behavior::Shell {
        command: "cat".to_string(),
    }))
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, peer) = connected_pair().await;
    let peer_task = tokio::spawn(send_and_collect(peer, b"hello shell\n".to_vec()));

    let report = timeout(
        Duration::from_secs(10),
        controller.handle(connection, coordinator.subscribe()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(peer_task.await.unwrap(), b"hello shell\n");
    match report {
        SessionReport::Shell { stats, exit } => {
            assert_eq!(stats.bytes_received, 12);
            assert_eq!(stats.bytes_sent, 12);
            assert!(exit.unwrap().success());
        }
        other => panic!("unexpected report: {:?}", other),
    }
}

#[tokio::test]
async fn test_shell_runs_interpreter_commands() {
    let controller = ModeController::new(session(Behavior::Shell {
        command: "sh".to_string(),
    }))
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, mut peer) = connected_pair().await;
    let handle = tokio::spawn(async move {
        controller.handle(connection, coordinator.subscribe()).await
    });

    peer.write_all(b"echo $((6 * 7))\n").await.unwrap();
    let mut line = [0u8; 3];
    timeout(Duration::from_secs(5), peer.read_exact(&mut line))
        .await
        .expect("shell output should come back while the connection is open")
        .unwrap();
    assert_eq!(&line, b"42\n");

    peer.write_all(b"exit 0\n").await.unwrap();
    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), peer.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    let report = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(matches!(report, Ok(SessionReport::Shell { .. })));
}

#[tokio::test]
async fn test_shell_with_missing_program_is_subprocess_error() {
    let controller = ModeController::new(session(Behavior::Shell {
        command: "rustcat-missing-interpreter".to_string(),
    }))
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, _peer) = connected_pair().await;
    let err = controller
        .handle(connection, coordinator.subscribe())
        .await
        .unwrap_err();
    assert!(matches!(err, CatError::Subprocess { .. }));
    assert_eq!(err.exit_code(), rustcat::error::EXIT_SUBPROCESS);
}

#[tokio::test]
async fn test_execute_sends_output_and_closes() {
    let controller = ModeController::new(session(Behavior::Execute {
        command: "echo hello from execute".to_string(),
    }))
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, mut peer) = connected_pair().await;
    let handle = tokio::spawn(async move {
        controller.handle(connection, coordinator.subscribe()).await
    });

    // The peer never closes its side; the receiver closes after the output
    let mut output = Vec::new();
    timeout(Duration::from_secs(5), peer.read_to_end(&mut output))
        .await
        .expect("execute mode should close after sending output")
        .unwrap();
    assert_eq!(output, b"hello from execute\n");

    let report = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
    match report {
        SessionReport::Executed { stats, exit } => {
            assert_eq!(stats.bytes_sent, output.len() as u64);
            assert!(exit.unwrap().success());
        }
        other => panic!("unexpected report: {:?}", other),
    }
}

/// In-process stand-in for a shell: upper-cases whatever it is sent
struct UppercaseShell;

struct UppercaseProcess {
    stdin: Option<DuplexStream>,
    output: Option<DuplexStream>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl ShellBackend for UppercaseShell {
    fn spawn(&self, _spec: &ProcessSpec) -> rustcat::Result<Box<dyn ShellProcess>> {
        let (stdin, mut worker_in) = tokio::io::duplex(1024);
        let (output, mut worker_out) = tokio::io::duplex(1024);
        let worker = tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                match worker_in.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let upper = buf[..n].to_ascii_uppercase();
                        if worker_out.write_all(&upper).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::new(UppercaseProcess {
            stdin: Some(stdin),
            output: Some(output),
            worker: Some(worker),
        }))
    }
}

#[async_trait]
impl ShellProcess for UppercaseProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn take_stdin(&mut self) -> Option<LocalWriter> {
        self.stdin.take().map(|s| Box::new(s) as LocalWriter)
    }

    fn take_output(&mut self) -> Option<LocalReader> {
        self.output.take().map(|s| Box::new(s) as LocalReader)
    }

    async fn terminate(&mut self, _grace: Duration) -> io::Result<ProcessExit> {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        Ok(ProcessExit {
            code: Some(0),
            killed: false,
        })
    }
}

#[tokio::test]
async fn test_shell_backend_is_substitutable() {
    let controller = ModeController::with_backend(
        session(Behavior::Shell {
            command: "pseudo".to_string(),
        }),
        Arc::new(UppercaseShell),
    )
    .unwrap();
    let coordinator = ShutdownCoordinator::new();

    let (connection, peer) = connected_pair().await;
    let peer_task = tokio::spawn(send_and_collect(peer, b"quiet please".to_vec()));

    let report = timeout(
        Duration::from_secs(5),
        controller.handle(connection, coordinator.subscribe()),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(peer_task.await.unwrap(), b"QUIET PLEASE");
    assert!(matches!(report, SessionReport::Shell { .. }));
}

#[tokio::test]
async fn test_run_connects_and_relays_upload() {
    let dir = tempfile::tempdir().unwrap();
    let path: PathBuf = dir.path().join("dialed.bin");

    // The sender is the listening side here; rustcat dials it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let sender = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        send_and_collect(stream, b"dialed payload".to_vec()).await
    });

    let mut config = session(Behavior::Upload { path: path.clone() });
    config.role = Role::Connect;
    config.port = port;
    let controller = ModeController::new(config).unwrap();
    let coordinator = ShutdownCoordinator::new();

    let report = timeout(Duration::from_secs(5), controller.run(coordinator.subscribe()))
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report, SessionReport::Uploaded(ref u) if u.bytes == 14));
    assert_eq!(std::fs::read(&path).unwrap(), b"dialed payload");
    assert!(sender.await.unwrap().starts_with(b"Saved file"));
}

#[tokio::test]
async fn test_run_interrupted_while_listening() {
    let mut config = session(Behavior::Plain);
    config.port = 0;
    let controller = ModeController::new(config).unwrap();
    let coordinator = ShutdownCoordinator::new();
    let shutdown_rx = coordinator.subscribe();

    let handle = tokio::spawn(async move { controller.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    coordinator.trigger();

    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(matches!(result, Err(CatError::Interrupted)));
}
