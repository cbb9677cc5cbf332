//! The surface host: connects out to a driver, executes drawing commands
//! against locally owned surfaces and answers each one.

pub mod dispatcher;
pub mod reconnect;
pub mod registry;
pub mod transport;

pub use dispatcher::Dispatcher;
pub use reconnect::{ConnectionState, HostHandle, HostOptions, spawn_host};
pub use registry::{ResourceRegistry, SurfaceSession};
pub use transport::{TransportEvent, TransportSession, TransportState};
