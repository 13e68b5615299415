use std::path::{Path, PathBuf};

use application::update_dispatcher::DataplaneUpdate;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accept newline-delimited JSON updates on a Unix socket and forward
/// them to the dispatcher channel.
///
/// This is the local transport for the upstream calculation graph;
/// updates whose JSON cannot be parsed (including unknown kinds) are
/// logged and skipped.
pub async fn run_update_feed(
    socket_path: PathBuf,
    tx: mpsc::Sender<DataplaneUpdate>,
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // A stale socket from a previous run blocks bind.
    let _ = std::fs::remove_file(&socket_path);

    let listener = UnixListener::bind(&socket_path)?;
    info!(path = %socket_path.display(), "update feed listening");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let tx = tx.clone();
                        let cancel = cancel_token.clone();
                        tokio::spawn(serve_connection(stream, tx, cancel));
                    }
                    Err(e) => {
                        warn!(error = %e, "update feed accept failed");
                    }
                }
            }
        }
    }

    cleanup_socket(&socket_path);
    Ok(())
}

fn cleanup_socket(path: &Path) {
    let _ = std::fs::remove_file(path);
}

async fn serve_connection(
    stream: UnixStream,
    tx: mpsc::Sender<DataplaneUpdate>,
    cancel_token: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<DataplaneUpdate>(&line) {
                            Ok(update) => {
                                if tx.send(update).await.is_err() {
                                    // Dispatcher is gone; nothing left to feed.
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "ignoring unparseable update");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "update feed read failed");
                        break;
                    }
                }
            }
        }
    }
    debug!("update feed connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn feed_fixture() -> (
        PathBuf,
        mpsc::Receiver<DataplaneUpdate>,
        CancellationToken,
        tempfile::TempDir,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("updates.sock");
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let feed_socket = socket.clone();
        let feed_cancel = cancel.clone();
        tokio::spawn(run_update_feed(feed_socket, tx, feed_cancel));

        // Wait for the listener to come up.
        for _ in 0..100 {
            if socket.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        (socket, rx, cancel, dir)
    }

    #[tokio::test]
    async fn feed_forwards_parsed_updates() {
        let (socket, mut rx, cancel, _dir) = feed_fixture().await;

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream
            .write_all(b"{\"kind\":\"interface_state\",\"name\":\"eth0\",\"state\":\"up\"}\n")
            .await
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert!(matches!(update, DataplaneUpdate::InterfaceState { .. }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn feed_skips_garbage_and_unknown_kinds() {
        let (socket, mut rx, cancel, _dir) = feed_fixture().await;

        let mut stream = UnixStream::connect(&socket).await.unwrap();
        stream.write_all(b"not json at all\n").await.unwrap();
        stream
            .write_all(b"{\"kind\":\"flux_capacitor\"}\n")
            .await
            .unwrap();
        stream
            .write_all(b"\n{\"kind\":\"workload_endpoint_remove\",\"id\":{\"namespace\":\"ns\",\"pod\":\"p\",\"endpoint\":\"e\"}}\n")
            .await
            .unwrap();

        // Only the valid update comes through.
        let update = rx.recv().await.unwrap();
        assert!(matches!(
            update,
            DataplaneUpdate::WorkloadEndpointRemove { .. }
        ));
        cancel.cancel();
    }
}
