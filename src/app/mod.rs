//! Usage: Host-facing glue (logging setup, UI bridge session).

pub mod logging;
pub mod session;
