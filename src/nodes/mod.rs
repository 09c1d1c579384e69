//! Node registration subsystem.
//!
//! # Data Flow
//! ```text
//! serve(socket)
//!     → ConnectionRegistry::open (close hook = on_disconnect)
//!     → handle: handshake bytes → hex public address → NodeRegistry::add
//!     → event loop: Ping continue, Close unregister + stop, anything else stop
//!     → ConnectionRegistry::close (hook removes the node if still present)
//! ```

pub mod manager;
pub mod registry;

pub use manager::NodeManager;
pub use registry::{Node, NodeError, NodeRegistry};
