//! Event loop and the pieces it is built from.

pub mod listener;
pub mod poller;
pub mod pool;
pub mod reactor;
pub mod stats;
pub mod timer;
pub mod waker;

pub use reactor::{ConnId, Server, ShutdownHandle};
pub use stats::{ServerStats, StatsSnapshot};
