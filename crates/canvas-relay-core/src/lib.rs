//! Core types shared by every canvas-relay crate: the wire protocol, the
//! command error taxonomy, enumerated drawing options, and configuration.

pub mod config;
pub mod error;
pub mod options;
pub mod protocol;

pub use error::{CommandError, RelayError, SurfaceError};
pub use protocol::{Command, CorrelationId, PathId, Response, SurfaceId};
