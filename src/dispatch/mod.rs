//! Match-and-dispatch: runs inbound text through the compiled rules and
//! delivers rendered output.
//!
//! - `binding`: destinations and the outgoing bot they are reached through
//! - `engine`: the `Dispatcher` (production and sandbox paths)

pub mod binding;
pub mod engine;

pub use binding::{Destination, OutgoingBinding, PRIVATE_PREFIX};
pub use engine::{DEFAULT_SEND_TIMEOUT, DispatchReport, Dispatcher, NO_MATCH_NOTICE};
