//! Server implementations
//!
//! - channel: one shard of a world; sessions, broadcasts and shared world state

pub mod channel;
