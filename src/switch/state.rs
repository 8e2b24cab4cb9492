//! Switch loop state machine.
//!
//! # States
//! - Idle: no loop running
//! - AwaitingCookieClear: cookies for the target URL are being removed
//! - Reloading: cache-bypassing reload issued, waiting for headers
//! - VerifyingHeader: response headers being compared to the target
//! - Succeeded / Exhausted: loop finished; externally the same as Idle
//!
//! # State Transitions
//! ```text
//! any → AwaitingCookieClear: switch requested (supersedes a running loop)
//! AwaitingCookieClear → Reloading: cookies removed, reload issued
//! Reloading → VerifyingHeader: next top-level response arrived
//! VerifyingHeader → Succeeded: observed == requested
//! VerifyingHeader → AwaitingCookieClear: miss, budget left (retry)
//! VerifyingHeader → Exhausted: miss, budget consumed
//! any active → Idle: cookie/reload failure or navigation error
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchState {
    #[default]
    Idle,
    AwaitingCookieClear,
    Reloading,
    VerifyingHeader,
    Succeeded,
    Exhausted,
}

impl SwitchState {
    /// Rest states have no requested backend.
    pub fn is_rest(&self) -> bool {
        matches!(self, Self::Idle | Self::Succeeded | Self::Exhausted)
    }

    pub fn can_transition(&self, to: SwitchState) -> bool {
        use SwitchState::*;
        match (self, to) {
            // a new request supersedes whatever is running
            (_, AwaitingCookieClear) => true,
            (AwaitingCookieClear, Reloading) => true,
            (Reloading, VerifyingHeader) => true,
            (VerifyingHeader, Succeeded | Exhausted) => true,
            // switching to the backend already serving the domain
            (AwaitingCookieClear, Succeeded) => true,
            (from, Idle) => !from.is_rest(),
            _ => false,
        }
    }
}
