//! External coding agents: how to invoke them and how to observe them.

pub mod definition;
pub mod executor;
pub mod watchdog;
