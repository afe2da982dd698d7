//! Sliding-window quota for the admission gate.
//!
//! This crate provides:
//! - The `CounterStore` contract (atomic increment-and-check per key)
//! - A Redis sorted-set store and an in-process store with the same semantics
//! - The fail-open `SlidingWindowLimiter`

pub mod clock;
pub mod error;
pub mod limiter;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use limiter::{LimiterConfig, SlidingWindowLimiter};
pub use memory::InMemoryCounterStore;
pub use redis_store::{RedisCounterStore, RedisStoreConfig};
pub use store::CounterStore;
