//! Unix socket IPC server: accept loop, per-connection reader, per-request
//! tasks and a single writer per connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::bz2::Bz2Service;
use crate::ipc::codec::{encode_payload, read_frame, write_frame, MSG_ERROR, MSG_REQUEST, MSG_RESPONSE};
use crate::ipc::router::{route_request, RequestEnvelope};
use crate::types::{Error, IpcConfig};

/// Replies queued per connection before request tasks wait on the writer.
const REPLY_QUEUE_DEPTH: usize = 64;

type OutgoingFrame = (u8, Vec<u8>);

/// IPC server wrapping the bz2 service.
#[derive(Debug)]
pub struct IpcServer {
    service: Bz2Service,
    cancel: CancellationToken,
    tracker: TaskTracker,
    ipc_config: IpcConfig,
    next_conn_id: AtomicU64,
}

impl IpcServer {
    pub fn new(service: Bz2Service, ipc_config: IpcConfig) -> Self {
        Self {
            service,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            ipc_config,
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Serve `listener` until shutdown is requested, then wait for in-flight
    /// requests to finish and their replies to be written.
    pub async fn serve(&self, listener: std::os::unix::net::UnixListener) -> std::io::Result<()> {
        let listener = UnixListener::from_std(listener)?;
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            "IPC server accepting connections (max_connections={})",
            self.ipc_config.max_connections,
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let stream = match accept {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            tracing::warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                "Connection {} rejected: at max_connections ({})",
                                conn_id,
                                self.ipc_config.max_connections,
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!("IPC connection {} (active={})",
                        conn_id,
                        self.ipc_config.max_connections - conn_semaphore.available_permits(),
                    );
                    let connection = Connection {
                        id: conn_id,
                        service: self.service.clone(),
                        cancel: self.cancel.clone(),
                        tracker: self.tracker.clone(),
                        ipc_config: self.ipc_config.clone(),
                    };
                    self.tracker.spawn(async move {
                        if let Err(e) = connection.run(stream, permit).await {
                            tracing::warn!("Connection {} error: {}", conn_id, e);
                        }
                    });
                }
            }
        }

        drop(listener);
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("IPC server stopped");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

struct Connection {
    id: u64,
    service: Bz2Service,
    cancel: CancellationToken,
    tracker: TaskTracker,
    ipc_config: IpcConfig,
}

impl Connection {
    /// Read frames until EOF, idle timeout or shutdown; each request runs on
    /// its own task and hands its reply to the connection's writer.
    async fn run(self, stream: UnixStream, _permit: OwnedSemaphorePermit) -> std::io::Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel::<OutgoingFrame>(REPLY_QUEUE_DEPTH);
        let writer_task = tokio::spawn(write_loop(writer, rx, self.ipc_config.write_timeout));

        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = self.next_frame(&mut reader) => frame,
            };
            let (msg_type, payload) = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    // The stream is out of sync; report and hang up.
                    let err = Error::malformed(e.to_string());
                    let _ = tx.send(error_frame("", &err)?).await;
                    break;
                }
            };

            if msg_type != MSG_REQUEST {
                let err = Error::malformed(format!("Unexpected message type: 0x{:02X}", msg_type));
                if tx.send(error_frame("", &err)?).await.is_err() {
                    break;
                }
                continue;
            }

            let envelope = match RequestEnvelope::decode(&payload) {
                Ok(envelope) => envelope,
                Err((id, err)) => {
                    if tx.send(error_frame(&id, &err)?).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            if self.cancel.is_cancelled() {
                let err = Error::unavailable("worker is shutting down");
                let _ = tx.send(error_frame(&envelope.id, &err)?).await;
                break;
            }

            let service = self.service.clone();
            let tx = tx.clone();
            self.tracker.spawn(async move {
                let frame = match dispatch(&service, envelope).await {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Reply encoding failed: {}", e);
                        return;
                    }
                };
                if tx.send(frame).await.is_err() {
                    tracing::debug!("Reply dropped: connection writer gone");
                }
            });
        }

        // The writer finishes once every in-flight request has sent its reply.
        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(format!(
                "connection {} writer failed: {}",
                self.id, e
            ))),
        }
    }

    async fn next_frame(&self, reader: &mut OwnedReadHalf) -> std::io::Result<Option<(u8, Vec<u8>)>> {
        let max_frame_bytes = self.ipc_config.max_frame_bytes;
        match self.ipc_config.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, read_frame(reader, max_frame_bytes)).await {
                Ok(result) => result,
                Err(_elapsed) => {
                    tracing::debug!("Connection {} idle for {:?}, dropping", self.id, idle);
                    Ok(None)
                }
            },
            None => read_frame(reader, max_frame_bytes).await,
        }
    }
}

/// Route one request and encode its reply frame.
async fn dispatch(service: &Bz2Service, envelope: RequestEnvelope) -> std::io::Result<OutgoingFrame> {
    match route_request(service, &envelope.service, &envelope.method, envelope.body).await {
        Ok(body) => {
            let response = serde_json::json!({
                "id": envelope.id,
                "ok": true,
                "body": body,
            });
            Ok((MSG_RESPONSE, encode_payload(&response)?))
        }
        Err(e) => error_frame(&envelope.id, &e),
    }
}

fn error_frame(id: &str, err: &Error) -> std::io::Result<OutgoingFrame> {
    let response = serde_json::json!({
        "id": id,
        "ok": false,
        "error": {
            "code": err.to_ipc_error_code(),
            "message": err.to_string(),
        }
    });
    Ok((MSG_ERROR, encode_payload(&response)?))
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<OutgoingFrame>,
    timeout: Duration,
) -> std::io::Result<()> {
    while let Some((msg_type, payload)) = rx.recv().await {
        timed_write(&mut writer, msg_type, &payload, timeout).await?;
    }
    Ok(())
}

/// Write a frame with a timeout. Returns an error if the write takes too long
/// (prevents slow consumers from holding connections indefinitely).
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    msg_type: u8,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, msg_type, payload))
        .await
        .map_err(|_| {
            tracing::warn!("Write timeout ({:?}), dropping connection", timeout);
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
