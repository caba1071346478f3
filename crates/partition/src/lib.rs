//! # Partition manager — a fixed table of named byte ranges
//!
//! A `PartitionManager` is built once, from a caller-supplied table of up
//! to [`MAX_PARTITIONS`] named, non-overlapping byte ranges within a
//! [`Device`]'s capacity, and is treated as effectively immutable for the
//! rest of the process's life (per spec.md §5: "partition layout is fixed
//! at compile/config time"). There is no internal mutex here — every
//! `read`/`write`/`erase` call delegates straight to the device, which
//! does its own serialization.
//!
//! Grounded on the reference driver's `fram_partition.c`.

use fram_config::Config;
use fram_device::Device;
use fram_hal::{FramError, Hal, InvalidSizeDetail, Result};

/// Maximum number of partitions a single table may hold.
pub const MAX_PARTITIONS: usize = 16;

/// Maximum length (in bytes) of a partition name, including no terminator
/// (unlike the C driver's `char[16]`, this is an owned `String`, so the
/// limit alone is carried forward as a validation rule).
pub const NAME_MAX: usize = 16;

/// A tiny hand-rolled bitflags macro, scoped to this crate's one flag
/// type — pulling in the `bitflags` crate for a single two-bit field
/// would be more machinery than the problem needs.
macro_rules! bitflags_lite {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(
                $(#[$fmeta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(
                $(#[$fmeta])*
                pub const $flag: Self = Self($value);
            )*

            /// The empty flag set.
            #[must_use]
            pub const fn empty() -> Self {
                Self(0)
            }

            /// True if `self` contains every bit set in `other`.
            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            /// The raw underlying bit pattern.
            #[must_use]
            pub const fn bits(self) -> $ty {
                self.0
            }

            /// Builds a flag set from a raw bit pattern, ignoring any
            /// unrecognized bits (mirrors the C driver treating `flags`
            /// as an opaque bitfield it only ever tests selected bits of).
            #[must_use]
            pub const fn from_bits(bits: $ty) -> Self {
                Self(bits)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

bitflags_lite! {
    /// Per-partition behavior flags.
    pub struct PartitionFlags: u32 {
        /// Rejects `write`/`erase` with `FramError::InvalidState`.
        const READONLY = 1 << 0;
        /// Reserved for caller-defined bookkeeping; carried through
        /// unchanged, not interpreted by this crate.
        const SYSTEM = 1 << 1;
    }
}

/// A single named, non-overlapping byte range within a device.
#[derive(Debug, Clone)]
pub struct Partition {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub flags: PartitionFlags,
}

impl Partition {
    /// Convenience constructor for a read-write partition.
    #[must_use]
    pub fn new(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            size,
            flags: PartitionFlags::empty(),
        }
    }

    /// Marks this partition read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.flags |= PartitionFlags::READONLY;
        self
    }

    /// True if `[offset, offset+len)` fits within this partition, per the
    /// same wrap-safe check used everywhere else in this workspace.
    #[must_use]
    pub fn is_valid_range(&self, offset: u32, len: u32) -> bool {
        fram_hal::range_in_bounds(offset, len, self.size)
    }
}

fn ranges_overlap(a_start: u32, a_end: u32, b_start: u32, b_end: u32) -> bool {
    a_start < b_end && b_start < a_end
}

/// Owns the validated partition table and the device it spans.
pub struct PartitionManager<H> {
    device: Device<H>,
    partitions: Vec<Partition>,
    erase_chunk: usize,
}

impl<H: Hal> PartitionManager<H> {
    /// Validates `partitions` against `device`'s capacity and against each
    /// other, then takes ownership of both.
    ///
    /// Rejects: an empty or over-long table, a zero-sized or empty-named
    /// or over-long-named partition, a partition that doesn't fit the
    /// device, and any pair of partitions whose ranges overlap.
    pub fn new(device: Device<H>, partitions: Vec<Partition>, config: &Config) -> Result<Self> {
        if partitions.is_empty() || partitions.len() > MAX_PARTITIONS {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let dev_size = device.capacity();
        for part in &partitions {
            if part.size == 0 {
                return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
            }
            if part.name.is_empty() || part.name.len() >= NAME_MAX {
                return Err(FramError::InvalidArgument("partition name length"));
            }
            if !fram_hal::range_in_bounds(part.offset, part.size, dev_size) {
                return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
            }
        }

        for i in 0..partitions.len() {
            let a_start = partitions[i].offset;
            let a_end = a_start + partitions[i].size;
            for other in &partitions[i + 1..] {
                let b_start = other.offset;
                let b_end = b_start + other.size;
                if ranges_overlap(a_start, a_end, b_start, b_end) {
                    return Err(FramError::InvalidState("partitions overlap"));
                }
            }
        }

        Ok(Self {
            device,
            partitions,
            erase_chunk: config.erase_chunk,
        })
    }

    /// Looks up a partition by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Returns the partition at `index`, if any.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Partition> {
        self.partitions.get(index)
    }

    /// Number of partitions in the table.
    #[must_use]
    pub fn count(&self) -> usize {
        self.partitions.len()
    }

    /// The device this table is mounted over.
    #[must_use]
    pub fn device(&self) -> &Device<H> {
        &self.device
    }

    /// Reads `buf.len()` bytes at `part`-relative `offset`.
    pub fn read(&self, part: &Partition, offset: u32, buf: &mut [u8]) -> Result<()> {
        if !part.is_valid_range(offset, buf.len() as u32) {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }
        self.device.read(part.offset + offset, buf)
    }

    /// Writes `data` at `part`-relative `offset`. Rejected on a read-only
    /// partition.
    pub fn write(&self, part: &Partition, offset: u32, data: &[u8]) -> Result<()> {
        if part.flags.contains(PartitionFlags::READONLY) {
            return Err(FramError::InvalidState("partition is read-only"));
        }
        if !part.is_valid_range(offset, data.len() as u32) {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }
        self.device.write(part.offset + offset, data)
    }

    /// Fills the entire partition with `0xFF`, in `erase_chunk`-sized
    /// writes.
    pub fn erase(&self, part: &Partition) -> Result<()> {
        if part.flags.contains(PartitionFlags::READONLY) {
            return Err(FramError::InvalidState("partition is read-only"));
        }
        let chunk_buf = vec![0xFFu8; self.erase_chunk];
        let mut offset = 0u32;
        let mut remaining = part.size;
        while remaining > 0 {
            let chunk = remaining.min(self.erase_chunk as u32);
            self.write(part, offset, &chunk_buf[..chunk as usize])?;
            offset += chunk;
            remaining -= chunk;
        }
        Ok(())
    }
}
