//! Unix domain socket server for IPC
//!
//! Request-response only. Input requests are forwarded to the controller
//! inbox; status is a snapshot folded from the controller's notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventSink, TurnEvent};
use crate::host::RecognitionRelay;

use super::protocol::{DaemonStatus, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<RwLock<ServerState>>,
    inputs: Arc<Inputs>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared server state
struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
}

/// Where forwarded input goes
struct Inputs {
    sink: EventSink,
    relay: RecognitionRelay,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, sink: EventSink, relay: RecognitionRelay) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            status: DaemonStatus::default(),
            start_time: std::time::Instant::now(),
        }));

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            state,
            inputs: Arc::new(Inputs { sink, relay }),
            shutdown_tx,
        })
    }

    /// Fold a controller notification into the status snapshot
    pub async fn apply_event(&self, event: &TurnEvent) {
        let mut server_state = self.state.write().await;
        let before = server_state.status.turn_state;
        server_state.status.apply(event);

        if before != server_state.status.turn_state {
            debug!(
                from = %before,
                to = %server_state.status.turn_state,
                "IPC server: turn state updated"
            );
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let inputs = Arc::clone(&self.inputs);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, inputs) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<RwLock<ServerState>>,
        inputs: Arc<Inputs>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            stream.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    Self::process_request(request, &state, &inputs).await
                }
                Err(e) => {
                    warn!(error = %e, "unparseable request");
                    Response::error("bad_request", e.to_string())
                }
            };

            Self::send_message(&mut stream, &response).await?;
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut UnixStream, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        state: &Arc<RwLock<ServerState>>,
        inputs: &Inputs,
    ) -> Response {
        let forwarded = match request {
            Request::Ping => return Response::Pong,

            Request::GetStatus => {
                let mut state = state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                return Response::Status(state.status.clone());
            }

            Request::Lifecycle { hook } => inputs.sink.send(Event::Host(hook)),
            Request::Gesture { gesture } => inputs.sink.gesture(gesture),
            Request::Pointer { event } => inputs.sink.pointer(event),

            Request::Utterance { text } => {
                if !inputs.relay.deliver_text(text) {
                    return Response::error("not_listening", "no recognition attempt is open");
                }
                true
            }
            Request::RecognitionError { code } => {
                if !inputs.relay.deliver_error(code) {
                    return Response::error("not_listening", "no recognition attempt is open");
                }
                true
            }
        };

        if forwarded {
            Response::Accepted
        } else {
            Response::error("controller_stopped", "the turn controller is not running")
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::Gesture;
    use crate::lifecycle::HostCommand;
    use crate::speech::{AttemptId, RecognitionEvent, RecognizerFactory};
    use crate::state::TurnState;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("handsfree-{}-{}.sock", std::process::id(), name))
    }

    async fn roundtrip(stream: &mut UnixStream, request: &Request) -> Response {
        Server::send_message(stream, request).await.unwrap();
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_requests_are_forwarded() {
        let path = socket_path("forward");
        let (sink, mut inbox) = EventSink::channel();
        let mut relay = RecognitionRelay::new();
        let server = Arc::new(Server::new(&path, sink.clone(), relay.clone()).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        let mut client = UnixStream::connect(&path).await.unwrap();
        assert!(matches!(roundtrip(&mut client, &Request::Ping).await, Response::Pong));

        let resp = roundtrip(
            &mut client,
            &Request::Lifecycle {
                hook: HostCommand::Activate,
            },
        )
        .await;
        assert!(matches!(resp, Response::Accepted));
        assert!(matches!(inbox.recv().await, Some(Event::Host(HostCommand::Activate))));

        let resp = roundtrip(
            &mut client,
            &Request::Gesture {
                gesture: Gesture::DoubleTap,
            },
        )
        .await;
        assert!(matches!(resp, Response::Accepted));
        assert!(matches!(inbox.recv().await, Some(Event::Gesture(Gesture::DoubleTap))));

        // no attempt open yet
        let resp = roundtrip(&mut client, &Request::Utterance { text: "capture".into() }).await;
        assert!(matches!(resp, Response::Error { code, .. } if code == "not_listening"));

        let mut recognizer = relay.create(sink);
        recognizer.start(AttemptId(1));
        let resp = roundtrip(&mut client, &Request::Utterance { text: "capture".into() }).await;
        assert!(matches!(resp, Response::Accepted));
        assert!(matches!(
            inbox.recv().await,
            Some(Event::Recognition(RecognitionEvent::Result { attempt: AttemptId(1), .. }))
        ));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_status_and_bad_requests() {
        let path = socket_path("status");
        let (sink, _inbox) = EventSink::channel();
        let server = Arc::new(Server::new(&path, sink, RecognitionRelay::new()).unwrap());
        server
            .apply_event(&TurnEvent::StateChanged {
                from: TurnState::Idle,
                to: TurnState::Announcing,
            })
            .await;
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });

        let mut client = UnixStream::connect(&path).await.unwrap();
        match roundtrip(&mut client, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.turn_state, TurnState::Announcing);
                assert_eq!(status.version, env!("CARGO_PKG_VERSION"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let garbage = b"{\"type\":\"launch_rockets\"}";
        client.write_all(&(garbage.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(garbage).await.unwrap();
        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        client.read_exact(&mut body).await.unwrap();
        let resp: Response = serde_json::from_slice(&body).unwrap();
        assert!(matches!(resp, Response::Error { code, .. } if code == "bad_request"));

        server.shutdown().await;
    }
}
