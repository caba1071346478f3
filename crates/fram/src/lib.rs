//! # Fram — the top-level handle tying every subsystem to one device
//!
//! [`Fram`] is the orchestration point a caller actually reaches for: it
//! owns the [`Device`], reads (or installs) the [`Superblock`] pair that
//! records the partition table, builds the [`PartitionManager`] from
//! whichever copy recovery selected, and hands out [`Ring`], [`VSlot`],
//! and [`Kvs`] handles bound to named partitions within that table.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!   |
//!   v
//! ┌──────────────────────────────────────────────────────────┐
//! │                          FRAM                             │
//! │                                                            │
//! │  format()/mount() → Device::new → Superblock read/write    │
//! │                         |                                  │
//! │                         v                                  │
//! │                   PartitionManager (recovered table)       │
//! │                    /         |          \                  │
//! │                   v          v           v                 │
//! │              open_ring() open_vslot() open_kvs()            │
//! │                   |          |           |                 │
//! │                   v          v           v                 │
//! │                 Ring       VSlot        Kvs                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module responsibilities
//!
//! | Crate              | Purpose                                         |
//! |---------------------|--------------------------------------------------|
//! | `fram-hal`          | `Hal`/`Clock` traits, `FramError`, `MockHal`      |
//! | `fram-device`       | serialized, health-tracked HAL gateway           |
//! | `fram-partition`    | validated table of named byte ranges             |
//! | `fram-superblock`   | A/B commit-protected storage of that table       |
//! | `fram-ring`         | fixed-capacity circular record log               |
//! | `fram-vslot`        | N-slot rotating "latest blob" store              |
//! | `fram-kvs`          | append-only tombstoning key/value log            |
//! | `fram` (this crate) | `Fram` handle, wiring the above together         |
//!
//! ## Mounting
//!
//! A fresh device has no valid superblock copy, so it must be
//! [`Fram::format`]ted once with a partition table before anything can be
//! [`Fram::mount`]ed from it again. Every subsequent boot recovers the
//! table from whichever A/B copy [`fram_superblock::read`] selects — the
//! caller never re-supplies the partition layout after the first format.
//!
//! Grounded on `engine::Engine::new` in the teacher: one constructor that
//! performs full recovery (WAL replay + SSTable load there; superblock
//! read + partition table rebuild here) before any other state is usable.

use std::sync::Arc;

use fram_device::{Device, Stats};
use fram_hal::{Clock, Hal, Result};
use fram_kvs::Kvs;
use fram_partition::PartitionManager;
use fram_ring::Ring;
use fram_superblock::{PartRecord, Superblock};
use fram_vslot::VSlot;

pub use fram_config::Config;
pub use fram_hal::{FixedClock, InvalidSizeDetail, MockHal};
pub use fram_partition::{Partition, PartitionFlags};
pub use fram_ring::RecordMeta;
pub use fram_superblock::STORAGE_SIZE as SUPERBLOCK_STORAGE_SIZE;

/// The top-level handle over one FRAM device: its superblock-recovered
/// partition table, and the subsystems opened on top of it.
pub struct Fram<H> {
    pm: Arc<PartitionManager<H>>,
    superblock_base: u32,
    config: Config,
}

impl<H: Hal> Fram<H> {
    /// Installs a brand-new partition table: writes a fresh superblock
    /// copy at `superblock_base` (sequence starts at 1, since neither A
    /// nor B copy was valid yet) and mounts the partition manager over
    /// it. Overwrites whatever superblock pair was already there.
    pub fn format(
        hal: H,
        superblock_base: u32,
        partitions: Vec<Partition>,
        config: Config,
    ) -> Result<Self> {
        let device = Device::new(hal, &config)?;
        let records: Vec<PartRecord> = partitions.iter().map(PartRecord::from).collect();
        let sb = Superblock::new(device.capacity(), records);
        fram_superblock::write(&device, superblock_base, &sb)?;
        log::info!("fram formatted with {} partitions", partitions.len());

        let pm = PartitionManager::new(device, partitions, &config)?;
        Ok(Self {
            pm: Arc::new(pm),
            superblock_base,
            config,
        })
    }

    /// Mounts an existing device: recovers the partition table from
    /// whichever superblock copy is valid and newest, then validates it
    /// against the device the same way [`format`](Self::format) does.
    /// Fails with `NotFound` if neither superblock copy is valid.
    pub fn mount(hal: H, superblock_base: u32, config: Config) -> Result<Self> {
        let device = Device::new(hal, &config)?;
        let sb = fram_superblock::read(&device, superblock_base)?;
        let partitions: Vec<Partition> = sb.parts.iter().map(PartRecord::to_partition).collect();
        log::debug!("fram mounted {} partitions at seq {}", partitions.len(), sb.seq);

        let pm = PartitionManager::new(device, partitions, &config)?;
        Ok(Self {
            pm: Arc::new(pm),
            superblock_base,
            config,
        })
    }

    /// The device offset the superblock A/B pair lives at.
    #[must_use]
    pub fn superblock_base(&self) -> u32 {
        self.superblock_base
    }

    /// The partition manager shared by every subsystem opened through
    /// this handle.
    #[must_use]
    pub fn partition_manager(&self) -> &Arc<PartitionManager<H>> {
        &self.pm
    }

    /// The underlying device's counters and health.
    #[must_use]
    pub fn device_stats(&self) -> Stats {
        self.pm.device().stats()
    }

    /// Whether the underlying device is still healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.pm.device().is_healthy()
    }

    /// Opens a [`Ring`] over the named partition.
    pub fn open_ring(&self, partition_name: &str, magic: u32) -> Result<Ring<H>> {
        Ring::new(self.pm.clone(), partition_name, magic, &self.config)
    }

    /// Opens a [`VSlot`] store over the named partition.
    pub fn open_vslot(&self, partition_name: &str, magic: u32, slot_count: u32) -> Result<VSlot<H>> {
        VSlot::new(self.pm.clone(), partition_name, magic, slot_count, &self.config)
    }

    /// Opens a [`Kvs`] over the named partition.
    pub fn open_kvs(&self, partition_name: &str, magic: u32) -> Result<Kvs<H>> {
        Kvs::new(self.pm.clone(), partition_name, magic, &self.config)
    }
}

/// A `Clock` that always reports the same timestamp; handy for demos and
/// callers that don't care about real wall-clock time. Re-exported here
/// so callers of this facade don't need a direct `fram-hal` dependency
/// just to supply one.
pub fn fixed_clock(ts_us: u64) -> impl Clock {
    FixedClock(ts_us)
}

#[cfg(test)]
mod tests;
