//! Host probing subsystem.
//!
//! # Data Flow
//! ```text
//! Status (nothing known yet) / Refresh
//!     → DomainRegistry::begin_probe (clear known set, new epoch)
//!     → prober.rs (N concurrent credential-less, uncached GETs)
//!     → Header Inspector on every response
//!     → aggregate (hint + observed, sorted, de-duplicated)
//!     → DomainRegistry::replace_known_backends (only if epoch current)
//!     → Status event on the bus
//! ```
//!
//! # Design Decisions
//! - Probes never carry or store cookies, so probing cannot bias the
//!   backend the load balancer picks for the user's session
//! - Every probe opens a fresh connection (no idle pooling); a reused
//!   connection would usually land on the same backend
//! - Failed requests are dropped; headerless responses become a sentinel

pub mod prober;

pub use prober::{aggregate, HostProber, ProbeError, UNKNOWN_BACKEND};
