//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C or command finished → trigger → service loop exits
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
