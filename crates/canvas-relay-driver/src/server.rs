//! Axum WebSocket endpoint the surface host connects to.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use canvas_relay_core::protocol::{CommandFrame, ContextOptions, ResponseFrame};
use canvas_relay_core::{Command, CorrelationId, Response, SurfaceId};

use crate::canvas::Canvas2d;
use crate::error::DriverError;

type Reply = oneshot::Sender<Result<Response, DriverError>>;

/// A command waiting for the host. `reply` is `None` for commands that
/// get no response.
struct Job {
    context: SurfaceId,
    command: Command,
    reply: Option<Reply>,
}

/// State shared with the connection handler.
struct PeerSlot {
    jobs: Mutex<mpsc::UnboundedReceiver<Job>>,
    connected: watch::Sender<bool>,
    /// Cancelled to drop the current host connection. Replaced per connection.
    connection: std::sync::Mutex<CancellationToken>,
    shutdown: CancellationToken,
}

impl PeerSlot {
    /// Token for a new connection; also ends with the driver.
    fn open_connection(&self) -> CancellationToken {
        let token = self.shutdown.child_token();
        if let Ok(mut current) = self.connection.lock() {
            *current = token.clone();
        }
        token
    }

    fn drop_connection(&self) {
        if let Ok(current) = self.connection.lock() {
            current.cancel();
        }
    }
}

struct DriverInner {
    jobs: mpsc::UnboundedSender<Job>,
    slot: Arc<PeerSlot>,
    local_addr: SocketAddr,
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        self.slot.shutdown.cancel();
    }
}

/// Serves one surface host at a time and sends it commands.
///
/// Requests issued while no host is connected queue until one connects.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

/// Bind the driver endpoint on `bind` (e.g. `127.0.0.1:7071`) and start
/// serving in the background.
pub async fn start_driver(bind: &str) -> anyhow::Result<Driver> {
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let (connected, _) = watch::channel(false);
    let slot = Arc::new(PeerSlot {
        jobs: Mutex::new(jobs_rx),
        connected,
        connection: std::sync::Mutex::new(CancellationToken::new()),
        shutdown: CancellationToken::new(),
    });

    let app = Router::new()
        .route("/", get(ws_handler))
        .with_state(slot.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local_addr = listener.local_addr()?;
    info!("Driver listening on {local_addr}");

    let shutdown = slot.shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            warn!(error = %e, "Driver server stopped with error");
        }
    });

    Ok(Driver {
        inner: Arc::new(DriverInner {
            jobs: jobs_tx,
            slot,
            local_addr,
        }),
    })
}

impl Driver {
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.slot.connected.borrow()
    }

    /// Wait until a host is connected. Returns `false` if the driver stopped.
    pub async fn wait_for_host(&self) -> bool {
        let mut connected = self.inner.slot.connected.subscribe();
        tokio::select! {
            result = connected.wait_for(|c| *c) => result.is_ok(),
            _ = self.inner.slot.shutdown.cancelled() => false,
        }
    }

    /// Drop the current host connection. In-flight requests fail with
    /// [`DriverError::Disconnected`]; queued ones wait for the next host.
    /// Does nothing while no host is connected.
    pub fn disconnect(&self) {
        self.inner.slot.drop_connection();
    }

    /// Stop serving. Pending and future requests fail.
    pub fn shutdown(&self) {
        self.inner.slot.shutdown.cancel();
    }

    /// Send `command` to surface `context` and wait for the reply.
    ///
    /// A `JsError` reply becomes [`DriverError::Remote`].
    pub async fn request(&self, context: &SurfaceId, command: Command) -> Result<Response, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.enqueue(context, command, Some(reply_tx))?;
        let reply = tokio::select! {
            reply = reply_rx => reply,
            _ = self.inner.slot.shutdown.cancelled() => return Err(DriverError::Stopped),
        };
        match reply {
            Ok(Ok(Response::JsError { message })) => Err(DriverError::Remote(message)),
            Ok(result) => result,
            Err(_) => Err(DriverError::Disconnected),
        }
    }

    /// Send `command` without waiting for (or expecting) a reply.
    pub fn send_detached(&self, context: &SurfaceId, command: Command) -> Result<(), DriverError> {
        self.enqueue(context, command, None)
    }

    /// Create a surface with a fresh id.
    pub async fn create_canvas(&self, width: u32, height: u32) -> Result<Canvas2d, DriverError> {
        self.create_canvas_with(width, height, ContextOptions::default())
            .await
    }

    pub async fn create_canvas_with(
        &self,
        width: u32,
        height: u32,
        options: ContextOptions,
    ) -> Result<Canvas2d, DriverError> {
        let id = SurfaceId::new(uuid::Uuid::new_v4().to_string());
        let command = Command::Init2DCanvas {
            data: options,
            width,
            height,
        };
        match self.request(&id, command).await? {
            Response::Success {} => Ok(Canvas2d::new(self.clone(), id, width, height)),
            other => Err(DriverError::UnexpectedResponse(other.tag())),
        }
    }

    fn enqueue(&self, context: &SurfaceId, command: Command, reply: Option<Reply>) -> Result<(), DriverError> {
        if self.inner.slot.shutdown.is_cancelled() {
            return Err(DriverError::Stopped);
        }
        self.inner
            .jobs
            .send(Job {
                context: context.clone(),
                command,
                reply,
            })
            .map_err(|_| DriverError::Stopped)
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(slot): State<Arc<PeerSlot>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_host_connection(slot, socket))
}

/// Serve one host until it disconnects, is disconnected, or the driver
/// stops.
async fn handle_host_connection(slot: Arc<PeerSlot>, mut ws: WebSocket) {
    let Ok(mut jobs) = slot.jobs.try_lock() else {
        warn!("Rejecting host connection, another host is already connected");
        let _ = ws.send(Message::Close(None)).await;
        return;
    };

    let conn_id = uuid::Uuid::new_v4().to_string();
    let connection = slot.open_connection();
    info!(conn_id = %conn_id, "Host connected");
    slot.connected.send_replace(true);

    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut in_flight: HashMap<String, Reply> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = slot.shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            _ = connection.cancelled() => {
                info!(conn_id = %conn_id, "Disconnecting host");
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let txn = uuid::Uuid::new_v4().to_string();
                let frame = CommandFrame {
                    data: job.command,
                    context: job.context,
                    txn_uuid: CorrelationId::new(txn.clone()),
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to encode command");
                        continue;
                    }
                };
                if let Some(reply) = job.reply {
                    in_flight.insert(txn, reply);
                }
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    settle(&conn_id, &mut in_flight, text.as_str());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, error = %e, "Host connection error");
                    break;
                }
            },
        }
    }

    // Dropping the reply senders fails every in-flight request.
    if !in_flight.is_empty() {
        debug!(conn_id = %conn_id, pending = in_flight.len(), "Failing in-flight requests");
    }
    drop(in_flight);
    slot.connected.send_replace(false);
    info!(conn_id = %conn_id, "Host disconnected");
}

/// Route one host reply to the request waiting for it.
fn settle(conn_id: &str, in_flight: &mut HashMap<String, Reply>, text: &str) {
    let frame: ResponseFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "Undecodable reply from host");
            return;
        }
    };
    let Some(txn) = frame.txn_uuid.0.as_str() else {
        warn!(conn_id = %conn_id, txn = %frame.txn_uuid, "Reply with foreign correlation id");
        return;
    };
    match in_flight.remove(txn) {
        Some(reply) => {
            let _ = reply.send(Ok(frame.data));
        }
        None => debug!(conn_id = %conn_id, txn, "Reply for unknown request"),
    }
}
