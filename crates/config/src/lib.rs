//! # Config — tunable knobs shared across the durability core
//!
//! The distilled spec this workspace implements describes several
//! behaviors only as effects ("a timed lock", "an error threshold after
//! which the device goes unhealthy", "a maximum payload size") without
//! naming concrete numbers. This crate gives those effects a home: a
//! plain, `Copy`-able struct every other crate takes by reference.
//!
//! There is deliberately no parsing, no env var reading, and no file
//! format here — that belongs to whatever embeds this core (the `cli`
//! crate reads a handful of env vars for its own demo purposes). This
//! crate only defines the shape and the defaults.

use std::time::Duration;

/// Tunable knobs threaded through every subsystem in this workspace.
///
/// The numeric defaults (`error_threshold = 3`, `mutex_timeout = 1000ms`)
/// are not present in the retrieved reference driver's build-time
/// configuration (only their *use* is visible there) — they are chosen
/// here as conservative, order-of-magnitude-matching literals. See
/// DESIGN.md for the reasoning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How long a caller waits to acquire a component's mutex before
    /// getting `FramError::Timeout`.
    pub mutex_timeout: Duration,
    /// Number of consecutive transport errors before the device flips
    /// unhealthy.
    pub error_threshold: u32,
    /// Maximum payload size accepted by a single ring append.
    pub ring_max_payload: u32,
    /// Maximum payload size accepted by a single versioned-slot save.
    pub vslot_max_payload: u32,
    /// Maximum value size accepted by a single KVS set.
    pub kvs_max_value: u32,
    /// Chunk size used when erasing a partition (bytes of `0xFF` written
    /// per HAL call).
    pub erase_chunk: usize,
    /// Chunk size used when streaming a KVS value through the CRC32
    /// accumulator, so an arbitrarily large value never needs a single
    /// contiguous scratch buffer.
    pub kvs_crc_chunk: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mutex_timeout: Duration::from_millis(1000),
            error_threshold: 3,
            ring_max_payload: 256,
            vslot_max_payload: 256,
            kvs_max_value: 65536,
            erase_chunk: 64,
            kvs_crc_chunk: 64,
        }
    }
}
