//! Mezeporta - MHF channel server core
//!
//! Session lifecycle, broadcast fan-out and the shared world registries
//! (stages, semaphores, Raviente) a channel server coordinates.

/// Channel server configuration
pub mod config;
/// Packet building primitives
pub mod network;
/// Server implementations
pub mod servers;
