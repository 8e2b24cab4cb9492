//! Notification subsystem.
//!
//! # Data Flow
//! ```text
//! Switcher state change
//!     → bus.rs (broadcast SwitcherEvent to toolbar-style observers)
//!     → channel.rs (push active backend to the tab's page badge)
//! ```
//!
//! # Design Decisions
//! - Delivery is best-effort: no observer, lagging observer or a closed
//!   page channel never reaches the caller
//! - Sessions hold only weak badge handles; the page side owns the channel

pub mod bus;
pub mod channel;

pub use bus::{NotificationBus, SwitcherEvent};
pub use channel::{BadgeChannel, BadgeHandle};
