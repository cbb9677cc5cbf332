//! Keeps the host connected to its driver.
//!
//! The controller owns the [`Dispatcher`], so surfaces outlive any single
//! connection. After a connection closes it waits for the reconnect delay and
//! opens a fresh [`TransportSession`]; a manual reconnect skips the wait.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use canvas_relay_core::config::HostConfig;

use crate::dispatcher::Dispatcher;
use crate::transport::{TransportEvent, TransportSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started yet.
    Idle,
    Connecting,
    Open,
    /// The last connection ended; a new one is pending.
    Closed,
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub address: String,
    pub reconnect_delay: Duration,
}

impl From<&HostConfig> for HostOptions {
    fn from(config: &HostConfig) -> Self {
        Self {
            address: config.address.clone(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
        }
    }
}

enum Control {
    Reconnect,
}

/// Cheap, cloneable handle to a running host.
#[derive(Clone)]
pub struct HostHandle {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl HostHandle {
    /// Drop the current connection (if any) and reconnect immediately.
    pub fn reconnect(&self) -> bool {
        self.control.send(Control::Reconnect).is_ok()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the connection reaches `target`. Returns `false` if the
    /// host stopped first.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut state = self.state.clone();
        state.wait_for(|current| *current == target).await.is_ok()
    }

    /// Close the connection and stop reconnecting.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct ReconnectController {
    options: HostOptions,
    dispatcher: Dispatcher,
    state: watch::Sender<ConnectionState>,
    control: mpsc::UnboundedReceiver<Control>,
    shutdown: CancellationToken,
    next_session: u64,
}

/// Start the host loop on the current runtime.
///
/// The join handle yields the dispatcher back once the host shuts down.
pub fn spawn_host(options: HostOptions, dispatcher: Dispatcher) -> (HostHandle, JoinHandle<Dispatcher>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let shutdown = CancellationToken::new();

    let controller = ReconnectController {
        options,
        dispatcher,
        state: state_tx,
        control: control_rx,
        shutdown: shutdown.clone(),
        next_session: 1,
    };
    let task = tokio::spawn(controller.run());

    let handle = HostHandle {
        control: control_tx,
        state: state_rx,
        shutdown,
    };
    (handle, task)
}

/// How a connection attempt ended.
enum Ended {
    Closed,
    ManualReconnect,
    Shutdown,
}

impl ReconnectController {
    async fn run(mut self) -> Dispatcher {
        info!(address = %self.options.address, delay_ms = self.options.reconnect_delay.as_millis() as u64, "Surface host starting");
        loop {
            match self.connect_once().await {
                Ended::Shutdown => break,
                Ended::ManualReconnect => continue,
                Ended::Closed => {}
            }

            debug!(delay_ms = self.options.reconnect_delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                Some(Control::Reconnect) = self.control.recv() => {
                    info!("Manual reconnect, skipping delay");
                }
            }
        }

        self.state.send_replace(ConnectionState::Closed);
        info!(surfaces = self.dispatcher.registry().len(), "Surface host stopped");
        self.dispatcher
    }

    /// Run one session from connect to close.
    async fn connect_once(&mut self) -> Ended {
        let id = self.next_session;
        self.next_session += 1;

        self.state.send_replace(ConnectionState::Connecting);
        let (session, mut events) = TransportSession::open(id, &self.options.address);
        debug!(session = id, url = session.url(), "Connecting to driver");

        let ended = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break Ended::Shutdown,
                Some(Control::Reconnect) = self.control.recv() => {
                    info!(session = id, "Manual reconnect requested");
                    break Ended::ManualReconnect;
                }
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => {
                        self.state.send_replace(ConnectionState::Open);
                        info!(session = id, surfaces = self.dispatcher.registry().len(), "Connected to driver");
                    }
                    Some(TransportEvent::Message(text)) => {
                        if let Some(reply) = self.dispatcher.handle_frame(&text) {
                            session.send(reply);
                        }
                    }
                    Some(TransportEvent::Closed) | None => break Ended::Closed,
                },
            }
        };

        session.close();
        self.state.send_replace(ConnectionState::Closed);
        ended
    }
}
