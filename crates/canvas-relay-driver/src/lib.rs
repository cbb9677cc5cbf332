//! The driver side of canvas-relay.
//!
//! A driver listens for a surface host, then issues drawing commands and
//! awaits their replies by correlation id.

pub mod canvas;
pub mod error;
pub mod server;

pub use canvas::{Canvas2d, CanvasState};
pub use error::DriverError;
pub use server::{Driver, start_driver};
