//! Transport implementations.
//!
//! Concrete implementations of the domain-level `Transport` trait, exposed
//! only through constructor functions. The requester and responder never
//! depend on transport-specific types.

mod memory;
mod redis;
pub(crate) mod runner;

pub use memory::{create_memory_transport, create_memory_transport_with_hub, MemoryHub};
pub use redis::create_redis_transport;
