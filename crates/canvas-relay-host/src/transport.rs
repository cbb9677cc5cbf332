//! One WebSocket connection to the driver.
//!
//! A [`TransportSession`] is single-use: once it reports
//! [`TransportEvent::Closed`] it never reopens. Reconnecting means opening a
//! new session.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
}

/// What a session reports to its owner, in order: at most one `Opened`, any
/// number of `Message`s, then exactly one `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed,
}

pub struct TransportSession {
    id: u64,
    url: String,
    outbound: mpsc::UnboundedSender<String>,
    state: watch::Receiver<TransportState>,
    cancel: CancellationToken,
}

impl TransportSession {
    /// Start connecting to `address` in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(id: u64, address: &str) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let url = normalize_address(address);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(TransportState::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(run_session(
            id,
            url.clone(),
            event_tx,
            outbound_rx,
            state_tx,
            cancel.clone(),
        ));

        let session = Self {
            id,
            url,
            outbound: outbound_tx,
            state: state_rx,
            cancel,
        };
        (session, event_rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Queue a text frame. Frames sent while the session is not open are
    /// dropped and `false` is returned.
    pub fn send(&self, frame: String) -> bool {
        if self.state() != TransportState::Open {
            debug!(session = self.id, "Dropping outbound frame, transport not open");
            return false;
        }
        self.outbound.send(frame).is_ok()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Accept bare `host:port` addresses as well as full `ws://` URLs.
pub fn normalize_address(address: &str) -> String {
    let address = address.trim();
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{address}")
    }
}

async fn run_session(
    id: u64,
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    state: watch::Sender<TransportState>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => Some(ws),
            Err(e) => {
                warn!(session = id, %url, error = %e, "Connection failed");
                None
            }
        },
    };

    if let Some(ws) = connected {
        let (mut sink, mut stream) = ws.split();
        state.send_replace(TransportState::Open);
        info!(session = id, %url, "Transport open");
        let _ = events.send(TransportEvent::Opened);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Some(frame) = outbound.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        warn!(session = id, error = %e, "Send failed");
                        break;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(TransportEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            let _ = events.send(TransportEvent::Message(text));
                        }
                        Err(_) => debug!(session = id, "Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session = id, ?frame, "Peer closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(session = id, error = %e, "Transport error");
                        break;
                    }
                    None => break,
                },
            }
        }
    }

    state.send_replace(TransportState::Closed);
    info!(session = id, "Transport closed");
    let _ = events.send(TransportEvent::Closed);
}
