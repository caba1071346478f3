//! # Ring log — fixed-capacity circular log of committed records
//!
//! A [`Ring`] is a circular log of `(seq, ts_us, payload)` records mounted
//! over a single [`Partition`]. Each slot is `header | payload area of
//! exactly max_payload bytes | commit byte`; a slot is only "live" once
//! its commit byte reads back `0xA5`, its magic matches, and its CRC
//! verifies — the commit byte is always the last thing written, so a
//! crash mid-append leaves the slot unambiguously dead.
//!
//! At construction the ring never trusts in-memory head/tail state — it
//! walks every slot, finds the highest live sequence number, then walks
//! backward expecting a strictly consecutive run of sequence numbers
//! until the first gap, torn slot, or `capacity` steps. That run is the
//! live log; anything before the gap is treated as lost.
//!
//! Grounded end-to-end on the reference driver's `fram_ring.c`.

use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::io::Cursor;

use fram_config::Config;
use fram_hal::{Clock, FramError, Hal, InvalidSizeDetail, Result};
use fram_partition::{Partition, PartitionManager};

const COMMIT: u8 = 0xA5;
const HEADER_SIZE: u32 = 4 + 4 + 8 + 2 + 2 + 4;

/// A single record's metadata, returned by [`Ring::peek_oldest`] and
/// [`Ring::peek_newest`] alongside the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMeta {
    pub seq: u32,
    pub ts_us: u64,
    pub len: u32,
}

struct Header {
    magic: u32,
    seq: u32,
    ts_us: u64,
    len: u16,
    crc32: u32,
}

fn header_bytes_for_crc(magic: u32, seq: u32, ts_us: u64, len: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE as usize - 4);
    buf.write_u32::<LittleEndian>(magic).unwrap();
    buf.write_u32::<LittleEndian>(seq).unwrap();
    buf.write_u64::<LittleEndian>(ts_us).unwrap();
    buf.write_u16::<LittleEndian>(len).unwrap();
    buf.write_u16::<LittleEndian>(0).unwrap(); // reserved
    buf
}

fn encode_header(magic: u32, seq: u32, ts_us: u64, len: u16, crc32: u32) -> Vec<u8> {
    let mut buf = header_bytes_for_crc(magic, seq, ts_us, len);
    buf.write_u32::<LittleEndian>(crc32).unwrap();
    buf
}

fn decode_header(bytes: &[u8]) -> Header {
    let mut cur = Cursor::new(bytes);
    let magic = cur.read_u32::<LittleEndian>().unwrap();
    let seq = cur.read_u32::<LittleEndian>().unwrap();
    let ts_us = cur.read_u64::<LittleEndian>().unwrap();
    let len = cur.read_u16::<LittleEndian>().unwrap();
    let _reserved = cur.read_u16::<LittleEndian>().unwrap();
    let crc32 = cur.read_u32::<LittleEndian>().unwrap();
    Header {
        magic,
        seq,
        ts_us,
        len,
        crc32,
    }
}

struct RingState {
    head_slot: u32,
    tail_slot: u32,
    head_seq: u32,
    count: u32,
}

/// A circular log of committed records mounted over one partition.
pub struct Ring<H> {
    pm: Arc<PartitionManager<H>>,
    part: Partition,
    magic: u32,
    max_payload: u32,
    entry_size: u32,
    capacity: u32,
    state: Mutex<RingState>,
    mutex_timeout: std::time::Duration,
}

impl<H: Hal> Ring<H> {
    /// Mounts a ring over `partition_name` within `pm`, validating that
    /// the partition can hold at least one `entry_size`-sized slot, then
    /// recovers head/tail/count/head_seq from whatever is already on
    /// media.
    pub fn new(
        pm: Arc<PartitionManager<H>>,
        partition_name: &str,
        magic: u32,
        config: &Config,
    ) -> Result<Self> {
        let part = pm
            .find(partition_name)
            .ok_or(FramError::NotFound)?
            .clone();

        let max_payload = config.ring_max_payload;
        if max_payload == 0 {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }
        let entry_size = HEADER_SIZE + max_payload + 1;
        let capacity = part.size / entry_size;
        if capacity == 0 {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let ring = Self {
            pm,
            part,
            magic,
            max_payload,
            entry_size,
            capacity,
            state: Mutex::new(RingState {
                head_slot: 0,
                tail_slot: 0,
                head_seq: 0,
                count: 0,
            }),
            mutex_timeout: config.mutex_timeout,
        };
        ring.recover()?;
        Ok(ring)
    }

    fn slot_offset(&self, slot: u32) -> u32 {
        slot * self.entry_size
    }

    fn commit_offset(&self, slot: u32) -> u32 {
        self.slot_offset(slot) + HEADER_SIZE + self.max_payload
    }

    fn read_commit(&self, slot: u32) -> Result<u8> {
        let mut byte = [0u8];
        self.pm.read(&self.part, self.commit_offset(slot), &mut byte)?;
        Ok(byte[0])
    }

    fn write_commit(&self, slot: u32, value: u8) -> Result<()> {
        self.pm.write(&self.part, self.commit_offset(slot), &[value])
    }

    /// Reads and validates one slot, returning its header and payload if
    /// live. Mirrors `fram_ring_validate_slot`: commit byte, magic,
    /// length bound, and CRC must all check out.
    fn validate_slot(&self, slot: u32) -> Result<(Header, Vec<u8>)> {
        let commit = self.read_commit(slot)?;
        if commit != COMMIT {
            return Err(FramError::NotFound);
        }

        let mut raw_header = vec![0u8; HEADER_SIZE as usize];
        self.pm.read(&self.part, self.slot_offset(slot), &mut raw_header)?;
        let hdr = decode_header(&raw_header);

        if hdr.magic != self.magic {
            return Err(FramError::NotFound);
        }
        if hdr.len as u32 > self.max_payload {
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

        let mut crc = fram_crc32::crc32(0, &header_bytes_for_crc(hdr.magic, hdr.seq, hdr.ts_us, hdr.len));
        if hdr.len > 0 {
            crc = fram_crc32::crc32(crc, &payload);
        }
        if crc != hdr.crc32 {
            return Err(FramError::InvalidCrc);
        }

        Ok((hdr, payload))
    }

    fn recover(&self) -> Result<()> {
        let mut highest: Option<(u32, u32)> = None; // (seq, slot)
        for slot in 0..self.capacity {
            if let Ok((hdr, _)) = self.validate_slot(slot) {
                let is_new_high = match highest {
                    Some((seq, _)) => hdr.seq > seq,
                    None => true,
                };
                if is_new_high {
                    highest = Some((hdr.seq, slot));
                }
            }
        }

        let mut state = self.state.lock();
        let Some((highest_seq, highest_slot)) = highest else {
            state.head_slot = 0;
            state.tail_slot = 0;
            state.head_seq = 0;
            state.count = 0;
            log::debug!("ring recovery found no live slots, starting empty");
            return Ok(());
        };

        let mut run_len = 0u32;
        let mut expected_seq = highest_seq;
        let mut slot = highest_slot;
        loop {
            match self.validate_slot(slot) {
                Ok((hdr, _)) if hdr.seq == expected_seq => {
                    run_len += 1;
                    if run_len >= self.capacity {
                        break;
                    }
                    expected_seq = expected_seq.wrapping_sub(1);
                    slot = (slot + self.capacity - 1) % self.capacity;
                }
                _ => break,
            }
        }

        if run_len < self.capacity {
            log::info!(
                "ring recovery truncated to {run_len} of {} possible slots",
                self.capacity
            );
        }

        state.count = run_len;
        state.head_slot = (highest_slot + 1) % self.capacity;
        state.head_seq = highest_seq + 1;
        state.tail_slot = (state.head_slot + self.capacity - state.count) % self.capacity;
        Ok(())
    }

    fn lock_state(&self) -> Result<parking_lot::MutexGuard<'_, RingState>> {
        self.state
            .try_lock_for(self.mutex_timeout)
            .ok_or(FramError::Timeout)
    }

    /// Appends `payload`, using `clock` to stamp the record's `ts_us`.
    ///
    /// Rejects payloads over `max_payload` or over `u16::MAX` bytes. On
    /// success the head advances and, once the ring is full, the oldest
    /// record is silently overwritten (its slot's tail advances too).
    pub fn append(&self, payload: &[u8], clock: &dyn Clock) -> Result<()> {
        if payload.len() as u32 > self.max_payload || payload.len() > u16::MAX as usize {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let mut state = self.lock_state()?;
        let slot = state.head_slot;

        self.write_commit(slot, 0x00)?;

        let seq = state.head_seq;
        let ts_us = clock.now_us();
        let len = payload.len() as u16;
        let crc = {
            let mut c = fram_crc32::crc32(0, &header_bytes_for_crc(self.magic, seq, ts_us, len));
            if !payload.is_empty() {
                c = fram_crc32::crc32(c, payload);
            }
            c
        };
        let header = encode_header(self.magic, seq, ts_us, len, crc);

        self.pm.write(&self.part, self.slot_offset(slot), &header)?;
        if !payload.is_empty() {
            self.pm
                .write(&self.part, self.slot_offset(slot) + HEADER_SIZE, payload)?;
        }
        self.write_commit(slot, COMMIT)?;

        state.head_seq = state.head_seq.wrapping_add(1);
        state.head_slot = (state.head_slot + 1) % self.capacity;
        if state.count < self.capacity {
            state.count += 1;
        } else {
            state.tail_slot = (state.tail_slot + 1) % self.capacity;
        }
        Ok(())
    }

    fn read_slot(&self, slot: u32, buf: Option<&mut Vec<u8>>) -> Result<RecordMeta> {
        let (hdr, payload) = self.validate_slot(slot)?;
        if let Some(out) = buf {
            *out = payload;
        }
        Ok(RecordMeta {
            seq: hdr.seq,
            ts_us: hdr.ts_us,
            len: hdr.len as u32,
        })
    }

    /// Returns the oldest live record's payload and metadata.
    pub fn peek_oldest(&self) -> Result<(Vec<u8>, RecordMeta)> {
        let state = self.lock_state()?;
        if state.count == 0 {
            return Err(FramError::NotFound);
        }
        let slot = state.tail_slot;
        drop(state);
        let mut payload = Vec::new();
        let meta = self.read_slot(slot, Some(&mut payload))?;
        Ok((payload, meta))
    }

    /// Returns the newest live record's payload and metadata.
    pub fn peek_newest(&self) -> Result<(Vec<u8>, RecordMeta)> {
        let state = self.lock_state()?;
        if state.count == 0 {
            return Err(FramError::NotFound);
        }
        let slot = (state.head_slot + self.capacity - 1) % self.capacity;
        drop(state);
        let mut payload = Vec::new();
        let meta = self.read_slot(slot, Some(&mut payload))?;
        Ok((payload, meta))
    }

    /// Returns the oldest live record's payload length, without reading
    /// the payload itself — the `buffer=NULL` case of spec.md §4.6's peek.
    pub fn peek_oldest_len(&self) -> Result<u32> {
        let state = self.lock_state()?;
        if state.count == 0 {
            return Err(FramError::NotFound);
        }
        let slot = state.tail_slot;
        drop(state);
        let meta = self.read_slot(slot, None)?;
        Ok(meta.len)
    }

    /// Returns the newest live record's payload length, without returning
    /// the payload itself — the `buffer=NULL` case of spec.md §4.6's peek.
    pub fn peek_newest_len(&self) -> Result<u32> {
        let state = self.lock_state()?;
        if state.count == 0 {
            return Err(FramError::NotFound);
        }
        let slot = (state.head_slot + self.capacity - 1) % self.capacity;
        drop(state);
        let meta = self.read_slot(slot, None)?;
        Ok(meta.len)
    }

    /// Walks every live record from oldest to newest, invoking `cb` with
    /// `(seq, ts_us, payload)`. Stops and propagates the first error `cb`
    /// returns, exactly as the C driver's iterate callback does.
    ///
    /// The ring's state lock is held for the entire walk, not just while
    /// reading head/tail/count — a concurrent `append` invalidates a slot
    /// (commit byte to `0x00`) before this walk reaches it otherwise,
    /// which would surface as a spurious failure on a perfectly valid
    /// ring. Mirrors `fram_ring_iterate` holding its mutex from the first
    /// slot read to the last.
    pub fn iterate<F>(&self, mut cb: F) -> Result<()>
    where
        F: FnMut(u32, u64, &[u8]) -> Result<()>,
    {
        let state = self.lock_state()?;
        if state.count == 0 {
            return Ok(());
        }
        let mut slot = state.tail_slot;
        let mut remaining = state.count;

        while remaining > 0 {
            let (hdr, payload) = self.validate_slot(slot)?;
            cb(hdr.seq, hdr.ts_us, &payload)?;
            slot = (slot + 1) % self.capacity;
            remaining -= 1;
        }
        drop(state);
        Ok(())
    }

    /// Erases the whole partition and resets head/tail/seq/count to zero.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        self.pm.erase(&self.part)?;
        state.head_slot = 0;
        state.tail_slot = 0;
        state.head_seq = 0;
        state.count = 0;
        Ok(())
    }

    /// Number of live records currently held.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    /// Maximum number of records the ring can hold.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// True once `count == capacity`.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.count() == self.capacity
    }

    /// True when `count == 0`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests;
