//! Stream cache (C5) and forwarding engine (C6): the datapath between the
//! TUN device and per-peer streams (spec §4.3).

pub mod engine;
pub mod queue;
pub mod stream_cache;

pub use engine::{ForwardingEngine, LocalAddrs};
pub use stream_cache::{SendError, StreamCache, WRITE_DEADLINE};
