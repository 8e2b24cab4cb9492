//! Switch loop subsystem.
//!
//! # Data Flow
//! ```text
//! Browser events / user actions
//!     → EventSender (unbounded queue)
//!     → service.rs (single consumer, one event at a time)
//!     → driver.rs (Switcher: registries, prober, browser effects)
//!     → NotificationBus + reply to the caller
//! ```
//!
//! # Design Decisions
//! - Events are handled in arrival order by one task; asynchronous work
//!   spawned from a handler (probes) re-checks epochs before writing back
//! - A blocked navigation gets its verdict through a oneshot reply so the
//!   browser can cancel it

pub mod driver;
pub mod events;
pub mod service;
pub mod state;

pub use driver::{SwitchError, Switcher, OWN_CANCELLATION};
pub use events::{
    ActionReply, InboundEvent, NavigationFailure, NavigationInfo, NavigationOutcome, NavigationResponse,
    SwitchOutcome, UserAction, UserRequest,
};
pub use service::{event_channel, EventSender, SwitcherService};
pub use state::SwitchState;
