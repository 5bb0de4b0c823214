//! Connection Module
//!
//! TCP transport, its shared close state, and the listener/dialer that
//! produce it.

pub mod dialer;
pub mod state;
pub mod transport;

pub use dialer::{connect, join_host_port, listen, Listener};
pub use state::{CloseSignal, CloseState};
pub use transport::Connection;
