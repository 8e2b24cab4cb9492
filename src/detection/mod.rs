//! Backend detection subsystem.
//!
//! # Data Flow
//! ```text
//! header_names config string
//!     → headers.rs (HeaderNames: lowercase, ordered, de-duplicated)
//!
//! Top-level navigation response / probe response
//!     → inspector.rs (is_inspectable: main frame, http(s) only)
//!     → inspector.rs (extract_backend: first configured name present)
//!     → Option<BackendId>
//! ```
//!
//! # Design Decisions
//! - Header names are case-insensitive, values are not
//! - Priority comes from configuration order, never from response order
//! - Pure functions; callers own all state

pub mod headers;
pub mod inspector;

pub use headers::{HeaderNames, ResponseHeader};
pub use inspector::{extract_backend, extract_backend_from_map, is_inspectable, ResourceType};
