//! Session layer: the consumer of connections.
//!
//! Each accepted [`crate::connection::Connection`] becomes a [`Session`]
//! that speaks the JSON message protocol in [`messages`]. Live sessions are
//! tracked in a [`SessionRegistry`] so `/session/{id}/...` HTTP requests
//! can reach them.

pub mod handle;
pub mod messages;
pub mod registry;
pub mod runner;
pub mod upload;

pub use handle::{Download, SessionHandle};
pub use registry::SessionRegistry;
pub use runner::{MessageHandler, Session};
pub use upload::{FileInfo, UploadManager};
