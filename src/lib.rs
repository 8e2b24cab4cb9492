//! Backend switcher library.
//!
//! Detects which backend behind a load balancer served a page, discovers
//! the other backends of a domain, and forces a tab onto a chosen backend
//! by clearing cookies and reloading until it lands there.

// Core subsystems
pub mod detection;
pub mod probe;
pub mod registry;
pub mod switch;
pub mod types;

// Collaborators
pub mod browser;
pub mod notification;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use browser::{Browser, HeadlessBrowser};
pub use config::SwitcherConfig;
pub use lifecycle::Shutdown;
pub use notification::{NotificationBus, SwitcherEvent};
pub use switch::{event_channel, EventSender, Switcher, SwitcherService};
pub use types::{BackendId, NavigationId, TabId};
