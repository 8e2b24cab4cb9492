//! Registries for per-domain and per-tab state.
//!
//! # Data Flow
//! ```text
//! Navigation observed / probe finished
//!     → domain.rs (DomainRegistry: active backend, known backends)
//!     → shared by every tab on the same host
//!
//! Switch request / header verification
//!     → tab.rs (TabRegistry: requested backend, retry count, generation)
//!     → exclusive to one tab
//! ```
//!
//! # Design Decisions
//! - Both registries are owned by the Switcher; nothing is a global
//! - DashMap guards are never held across an await point
//! - Entries are created lazily; domains live for the process lifetime,
//!   tab sessions until the tab closes

pub mod domain;
pub mod tab;

pub use domain::{DomainRegistry, DomainSnapshot};
pub use tab::{LoopView, RetryDecision, StartedLoop, TabRegistry};
