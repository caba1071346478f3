//! # Versioned slot store — N rotating slots, highest-version-wins
//!
//! A [`VSlot`] holds one logical "latest blob" across `slot_count` (2 or
//! 3) rotating physical slots. Every [`VSlot::save`] writes to the slot
//! *after* the currently active one (never in place) and bumps the
//! version; [`VSlot::load`] always serves the valid slot with the
//! highest version. This gives a save an implicit undo: if a crash tears
//! the new slot mid-write, the previous slot is still valid and has the
//! next-highest version, so recovery falls straight back to it.
//!
//! Grounded field-for-field on the reference driver's `fram_vslot.c`.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use fram_config::Config;
use fram_hal::{Clock, FramError, Hal, InvalidSizeDetail, Result};
use fram_partition::{Partition, PartitionManager};

const COMMIT: u8 = 0xA5;
const HEADER_SIZE: u32 = 4 + 4 + 8 + 4 + 4;

struct Header {
    magic: u32,
    version: u32,
    ts_us: u64,
    len: u32,
    crc32: u32,
}

fn header_bytes_for_crc(magic: u32, version: u32, ts_us: u64, len: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE as usize - 4);
    buf.write_u32::<LittleEndian>(magic).unwrap();
    buf.write_u32::<LittleEndian>(version).unwrap();
    buf.write_u64::<LittleEndian>(ts_us).unwrap();
    buf.write_u32::<LittleEndian>(len).unwrap();
    buf
}

fn encode_header(magic: u32, version: u32, ts_us: u64, len: u32, crc32: u32) -> Vec<u8> {
    let mut buf = header_bytes_for_crc(magic, version, ts_us, len);
    buf.write_u32::<LittleEndian>(crc32).unwrap();
    buf
}

fn decode_header(bytes: &[u8]) -> Header {
    let mut cur = Cursor::new(bytes);
    let magic = cur.read_u32::<LittleEndian>().unwrap();
    let version = cur.read_u32::<LittleEndian>().unwrap();
    let ts_us = cur.read_u64::<LittleEndian>().unwrap();
    let len = cur.read_u32::<LittleEndian>().unwrap();
    let crc32 = cur.read_u32::<LittleEndian>().unwrap();
    Header {
        magic,
        version,
        ts_us,
        len,
        crc32,
    }
}

struct ActiveState {
    slot: u32,
    version: u32,
    has_data: bool,
}

/// N (2 or 3) rotating slots holding a single versioned blob.
pub struct VSlot<H> {
    pm: Arc<PartitionManager<H>>,
    part: Partition,
    magic: u32,
    max_payload: u32,
    slot_size: u32,
    slot_count: u32,
    active: Mutex<ActiveState>,
    mutex_timeout: std::time::Duration,
}

impl<H: Hal> VSlot<H> {
    /// Mounts a versioned slot store over `partition_name`, validating
    /// `slot_count ∈ {2, 3}` and that the partition fits
    /// `slot_count * slot_size`, then recovers the active slot from
    /// media (the valid slot with the highest version wins; ties cannot
    /// occur since versions are assigned monotonically by `save`).
    pub fn new(
        pm: Arc<PartitionManager<H>>,
        partition_name: &str,
        magic: u32,
        slot_count: u32,
        config: &Config,
    ) -> Result<Self> {
        if !(2..=3).contains(&slot_count) {
            return Err(FramError::InvalidArgument("slot_count must be 2 or 3"));
        }
        let max_payload = config.vslot_max_payload;
        if max_payload == 0 {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let part = pm
            .find(partition_name)
            .ok_or(FramError::NotFound)?
            .clone();

        let slot_size = HEADER_SIZE + max_payload + 1;
        if part.size < slot_size * slot_count {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let vslot = Self {
            pm,
            part,
            magic,
            max_payload,
            slot_size,
            slot_count,
            active: Mutex::new(ActiveState {
                slot: 0,
                version: 0,
                has_data: false,
            }),
            mutex_timeout: config.mutex_timeout,
        };
        vslot.recover()?;
        Ok(vslot)
    }

    fn slot_offset(&self, slot: u32) -> u32 {
        slot * self.slot_size
    }

    fn commit_offset(&self, slot: u32) -> u32 {
        self.slot_offset(slot) + HEADER_SIZE + self.max_payload
    }

    fn write_commit(&self, slot: u32, value: u8) -> Result<()> {
        self.pm.write(&self.part, self.commit_offset(slot), &[value])
    }

    fn validate_slot(&self, slot: u32) -> Result<(Header, Vec<u8>)> {
        let mut commit = [0u8];
        self.pm.read(&self.part, self.commit_offset(slot), &mut commit)?;
        if commit[0] != COMMIT {
            return Err(FramError::NotFound);
        }

        let mut raw_header = vec![0u8; HEADER_SIZE as usize];
        self.pm.read(&self.part, self.slot_offset(slot), &mut raw_header)?;
        let hdr = decode_header(&raw_header);

        if hdr.magic != self.magic {
            return Err(FramError::NotFound);
        }
        if hdr.len > self.max_payload {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let mut payload = vec![0u8; hdr.len as usize];
        if hdr.len > 0 {
            self.pm.read(
                &self.part,
                self.slot_offset(slot) + HEADER_SIZE,
                &mut payload,
            )?;
        }

        let mut crc = fram_crc32::crc32(
            0,
            &header_bytes_for_crc(hdr.magic, hdr.version, hdr.ts_us, hdr.len),
        );
        if hdr.len > 0 {
            crc = fram_crc32::crc32(crc, &payload);
        }
        if crc != hdr.crc32 {
            return Err(FramError::InvalidCrc);
        }

        Ok((hdr, payload))
    }

    fn recover(&self) -> Result<()> {
        let mut best: Option<(u32, u32)> = None; // (version, slot)
        for slot in 0..self.slot_count {
            if let Ok((hdr, _)) = self.validate_slot(slot) {
                let is_better = match best {
                    Some((version, _)) => hdr.version > version,
                    None => true,
                };
                if is_better {
                    best = Some((hdr.version, slot));
                }
            }
        }

        let mut active = self.active.lock();
        match best {
            Some((version, slot)) => {
                active.slot = slot;
                active.version = version;
                active.has_data = true;
                log::debug!("vslot recovery selected slot {slot} at version {version}");
            }
            None => {
                active.slot = 0;
                active.version = 0;
                active.has_data = false;
                log::debug!("vslot recovery found no valid slot");
            }
        }
        Ok(())
    }

    fn lock_active(&self) -> Result<parking_lot::MutexGuard<'_, ActiveState>> {
        self.active
            .try_lock_for(self.mutex_timeout)
            .ok_or(FramError::Timeout)
    }

    /// Writes `payload` to the next slot in rotation and bumps the
    /// version. The previous slot is left untouched until overwritten by
    /// a future save `slot_count` saves from now.
    pub fn save(&self, payload: &[u8], clock: &dyn Clock) -> Result<()> {
        if payload.len() as u32 > self.max_payload {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let mut active = self.lock_active()?;
        let next_version = if active.has_data {
            active.version + 1
        } else {
            1
        };
        let slot = if active.has_data {
            (active.slot + 1) % self.slot_count
        } else {
            0
        };

        self.write_commit(slot, 0x00)?;

        let ts_us = clock.now_us();
        let len = payload.len() as u32;
        let crc = {
            let mut c = fram_crc32::crc32(
                0,
                &header_bytes_for_crc(self.magic, next_version, ts_us, len),
            );
            if !payload.is_empty() {
                c = fram_crc32::crc32(c, payload);
            }
            c
        };
        let header = encode_header(self.magic, next_version, ts_us, len, crc);

        self.pm.write(&self.part, self.slot_offset(slot), &header)?;
        if !payload.is_empty() {
            self.pm
                .write(&self.part, self.slot_offset(slot) + HEADER_SIZE, payload)?;
        }
        self.write_commit(slot, COMMIT)?;

        active.slot = slot;
        active.version = next_version;
        active.has_data = true;
        Ok(())
    }

    /// Returns the active slot's payload.
    pub fn load(&self) -> Result<Vec<u8>> {
        let active = self.lock_active()?;
        if !active.has_data {
            return Err(FramError::NotFound);
        }
        let slot = active.slot;
        drop(active);
        let (_, payload) = self.validate_slot(slot)?;
        Ok(payload)
    }

    /// Returns the active slot's payload length without reading the
    /// payload bytes.
    pub fn peek_len(&self) -> Result<u32> {
        let active = self.lock_active()?;
        if !active.has_data {
            return Err(FramError::NotFound);
        }
        let slot = active.slot;
        drop(active);
        let (hdr, _) = self.validate_slot(slot)?;
        Ok(hdr.len)
    }

    /// Whether a valid save has ever landed (and survived recovery).
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.active.lock().has_data
    }

    /// The active slot's version, or `0` if `has_data()` is false.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.active.lock().version
    }

    /// Erases the whole partition and resets to the empty state.
    pub fn clear(&self) -> Result<()> {
        let mut active = self.lock_active()?;
        self.pm.erase(&self.part)?;
        active.has_data = false;
        active.version = 0;
        active.slot = 0;
        Ok(())
    }
}
