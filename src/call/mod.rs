//! Call lifecycle: the status of the single live call and the transitions
//! that local actions and remote notifications may apply to it.
pub mod lifecycle;

pub use lifecycle::{CallAction, CallLifecycle, CallRole, CallSession, CallStatus, EndOutcome};
