//! OS process probes and shutdown escalation.

mod control;

pub use control::{force_kill, graceful_shutdown, is_process_alive, terminate};
