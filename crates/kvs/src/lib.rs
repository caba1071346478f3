//! # KVS — an append-only key/value log
//!
//! A [`Kvs`] is a flat append-only log of `header | key | value | commit`
//! records mounted over one partition. There is no index: every `get`,
//! `exists`, and `get_len` rescans from offset 0, remembering the last
//! live record matching the key (last-write-wins) before returning it —
//! `set` and `delete` (a tombstone write) both simply append. Recovery
//! scans once at mount time to find the first non-live record; that
//! point becomes `write_offset`, and the highest sequence number seen
//! becomes `next_seq`.
//!
//! A record only counts as "live" once its commit byte reads back
//! `0xA5` and its CRC (over header-minus-crc32, then key, then a
//! 64-byte-chunked streaming read of the value) verifies. The first
//! record that fails this — including simply reading as all zeroes past
//! the last real write — stops the scan: nothing after a torn or
//! corrupted record is ever trusted, even if a later record happens to
//! look valid.
//!
//! Grounded end-to-end on the reference driver's `fram_kvs.c`.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use fram_config::Config;
use fram_hal::{FramError, Hal, InvalidSizeDetail, Result};
use fram_partition::{Partition, PartitionManager};

const COMMIT: u8 = 0xA5;
const FLAG_TOMBSTONE: u8 = 1 << 0;
/// Maximum key length in bytes, matching `FRAM_KVS_KEY_MAX`.
pub const KEY_MAX: usize = 15;
const HEADER_SIZE: u32 = 4 + 4 + 2 + 2 + 1 + 3 + 4;

struct Header {
    magic: u32,
    seq: u32,
    key_len: u16,
    value_len: u16,
    flags: u8,
    crc32: u32,
}

impl Header {
    fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }
}

fn header_bytes_for_crc(magic: u32, seq: u32, key_len: u16, value_len: u16, flags: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE as usize - 4);
    buf.write_u32::<LittleEndian>(magic).unwrap();
    buf.write_u32::<LittleEndian>(seq).unwrap();
    buf.write_u16::<LittleEndian>(key_len).unwrap();
    buf.write_u16::<LittleEndian>(value_len).unwrap();
    buf.write_u8(flags).unwrap();
    buf.write_all(&[0u8; 3]).unwrap();
    buf
}

fn encode_header(magic: u32, seq: u32, key_len: u16, value_len: u16, flags: u8, crc32: u32) -> Vec<u8> {
    let mut buf = header_bytes_for_crc(magic, seq, key_len, value_len, flags);
    buf.write_u32::<LittleEndian>(crc32).unwrap();
    buf
}

fn decode_header(bytes: &[u8]) -> Header {
    let mut cur = Cursor::new(bytes);
    let magic = cur.read_u32::<LittleEndian>().unwrap();
    let seq = cur.read_u32::<LittleEndian>().unwrap();
    let key_len = cur.read_u16::<LittleEndian>().unwrap();
    let value_len = cur.read_u16::<LittleEndian>().unwrap();
    let flags = cur.read_u8().unwrap();
    let mut reserved = [0u8; 3];
    cur.read_exact(&mut reserved).unwrap();
    let crc32 = cur.read_u32::<LittleEndian>().unwrap();
    Header {
        magic,
        seq,
        key_len,
        value_len,
        flags,
        crc32,
    }
}

use std::io::Read as _;
use std::io::Write as _;

struct ScanHit {
    header: Header,
    offset: u32,
}

/// An append-only, tombstone-capable key/value log.
pub struct Kvs<H> {
    pm: Arc<PartitionManager<H>>,
    part: Partition,
    magic: u32,
    max_value: u32,
    crc_chunk: usize,
    state: Mutex<KvsState>,
    mutex_timeout: std::time::Duration,
}

struct KvsState {
    write_offset: u32,
    next_seq: u32,
}

impl<H: Hal> Kvs<H> {
    /// Mounts a KVS over `partition_name`, then recovers `write_offset`
    /// and `next_seq` by scanning from offset 0 until the first record
    /// that isn't live.
    pub fn new(pm: Arc<PartitionManager<H>>, partition_name: &str, magic: u32, config: &Config) -> Result<Self> {
        let part = pm
            .find(partition_name)
            .ok_or(FramError::NotFound)?
            .clone();

        let kvs = Self {
            pm,
            part,
            magic,
            max_value: config.kvs_max_value,
            crc_chunk: config.kvs_crc_chunk,
            state: Mutex::new(KvsState {
                write_offset: 0,
                next_seq: 0,
            }),
            mutex_timeout: config.mutex_timeout,
        };
        let (write_offset, next_seq) = kvs.find_end()?;
        let mut state = kvs.state.lock();
        state.write_offset = write_offset;
        state.next_seq = next_seq;
        drop(state);
        Ok(kvs)
    }

    fn header_looks_valid(&self, hdr: &Header) -> bool {
        hdr.magic == self.magic
            && hdr.key_len >= 1
            && hdr.key_len as usize <= KEY_MAX
            && (hdr.value_len as u32) <= self.max_value
    }

    fn read_header(&self, offset: u32) -> Result<Header> {
        let mut buf = vec![0u8; HEADER_SIZE as usize];
        self.pm.read(&self.part, offset, &mut buf)?;
        Ok(decode_header(&buf))
    }

    fn commit_offset(&self, offset: u32, key_len: u16, value_len: u16) -> u32 {
        offset + HEADER_SIZE + key_len as u32 + value_len as u32
    }

    fn verify_record(&self, offset: u32, hdr: &Header) -> Result<Vec<u8>> {
        let mut key_buf = vec![0u8; hdr.key_len as usize];
        self.pm.read(&self.part, offset + HEADER_SIZE, &mut key_buf)?;

        let mut crc = fram_crc32::crc32(
            0,
            &header_bytes_for_crc(hdr.magic, hdr.seq, hdr.key_len, hdr.value_len, hdr.flags),
        );
        crc = fram_crc32::crc32(crc, &key_buf);

        let value_offset = offset + HEADER_SIZE + hdr.key_len as u32;
        let mut remaining = hdr.value_len as u32;
        let mut pos = value_offset;
        let mut chunk_buf = vec![0u8; self.crc_chunk];
        while remaining > 0 {
            let chunk = remaining.min(self.crc_chunk as u32);
            self.pm.read(&self.part, pos, &mut chunk_buf[..chunk as usize])?;
            crc = fram_crc32::crc32(crc, &chunk_buf[..chunk as usize]);
            pos += chunk;
            remaining -= chunk;
        }

        if crc != hdr.crc32 {
            return Err(FramError::InvalidCrc);
        }
        Ok(key_buf)
    }

    /// Scans from offset 0, stopping at the first record that doesn't
    /// look like a valid header, fails its commit check, or fails CRC.
    /// Returns the last live record matching `key`, if any.
    fn scan(&self, key: &str) -> Result<Option<ScanHit>> {
        let mut offset = 0u32;
        let mut hit: Option<ScanHit> = None;
        let part_size = self.part.size;

        while offset as u64 + HEADER_SIZE as u64 + 1 <= part_size as u64 {
            let hdr = self.read_header(offset)?;
            if !self.header_looks_valid(&hdr) {
                break;
            }
            let record_size = HEADER_SIZE + hdr.key_len as u32 + hdr.value_len as u32 + 1;
            if record_size > part_size || offset + record_size > part_size {
                break;
            }

            let mut commit = [0u8];
            self.pm.read(
                &self.part,
                self.commit_offset(offset, hdr.key_len, hdr.value_len),
                &mut commit,
            )?;
            if commit[0] != COMMIT {
                break;
            }

            let key_bytes = match self.verify_record(offset, &hdr) {
                Ok(bytes) => bytes,
                Err(FramError::InvalidCrc) => break,
                Err(e) => return Err(e),
            };

            if key_bytes == key.as_bytes() {
                hit = Some(ScanHit { header: hdr, offset });
            }

            offset += record_size;
        }

        Ok(hit)
    }

    fn find_end(&self) -> Result<(u32, u32)> {
        let mut offset = 0u32;
        let mut next_seq = 0u32;
        let part_size = self.part.size;

        while offset as u64 + HEADER_SIZE as u64 + 1 <= part_size as u64 {
            let hdr = self.read_header(offset)?;
            if !self.header_looks_valid(&hdr) {
                break;
            }
            let record_size = HEADER_SIZE + hdr.key_len as u32 + hdr.value_len as u32 + 1;
            if record_size > part_size || offset + record_size > part_size {
                break;
            }

            let mut commit = [0u8];
            self.pm.read(
                &self.part,
                self.commit_offset(offset, hdr.key_len, hdr.value_len),
                &mut commit,
            )?;
            if commit[0] != COMMIT {
                break;
            }

            if self.verify_record(offset, &hdr).is_err() {
                break;
            }

            if hdr.seq >= next_seq {
                next_seq = hdr.seq + 1;
            }
            offset += record_size;
        }

        if offset < self.part.size {
            log::debug!("kvs recovery scan stopped at offset {offset} of {}", self.part.size);
        }
        Ok((offset, next_seq))
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() || key.len() > KEY_MAX {
            return Err(FramError::InvalidArgument("key length must be 1..=15"));
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<parking_lot::MutexGuard<'_, KvsState>> {
        self.state
            .try_lock_for(self.mutex_timeout)
            .ok_or(FramError::Timeout)
    }

    fn append(&self, key: &str, value: &[u8], flags: u8) -> Result<()> {
        Self::validate_key(key)?;
        if value.len() > u16::MAX as usize || value.len() as u32 > self.max_value {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }

        let mut state = self.lock_state()?;
        let key_len = key.len() as u16;
        let value_len = value.len() as u16;
        let record_size = HEADER_SIZE + key_len as u32 + value_len as u32 + 1;
        if state.write_offset + record_size > self.part.size {
            return Err(FramError::NoMemory("kvs partition is full"));
        }

        let offset = state.write_offset;
        let seq = state.next_seq;

        // Clear any stale commit byte first, matching the C driver's
        // defensive double-write.
        self.pm
            .write(&self.part, self.commit_offset(offset, key_len, value_len), &[0x00])?;

        let crc = {
            let mut c = fram_crc32::crc32(
                0,
                &header_bytes_for_crc(self.magic, seq, key_len, value_len, flags),
            );
            c = fram_crc32::crc32(c, key.as_bytes());
            if !value.is_empty() {
                c = fram_crc32::crc32(c, value);
            }
            c
        };
        let header = encode_header(self.magic, seq, key_len, value_len, flags, crc);

        self.pm.write(&self.part, offset, &header)?;
        self.pm
            .write(&self.part, offset + HEADER_SIZE, key.as_bytes())?;
        if !value.is_empty() {
            self.pm
                .write(&self.part, offset + HEADER_SIZE + key_len as u32, value)?;
        }
        self.pm
            .write(&self.part, self.commit_offset(offset, key_len, value_len), &[COMMIT])?;

        state.write_offset += record_size;
        state.next_seq += 1;
        Ok(())
    }

    /// Returns the live value for `key`, or `FramError::NotFound` if
    /// absent or tombstoned.
    ///
    /// Holds the KVS mutex across the whole rescan-and-read, the same as
    /// `set`/`delete` hold it across their append — otherwise a
    /// concurrent write could shadow or tombstone `key` mid-scan and this
    /// read would return a value that was never actually the latest live
    /// one. Mirrors `fram_kvs_get`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        Self::validate_key(key)?;
        let _guard = self.lock_state()?;
        let hit = self.scan(key)?.ok_or(FramError::NotFound)?;
        if hit.header.is_tombstone() {
            return Err(FramError::NotFound);
        }
        let mut value = vec![0u8; hit.header.value_len as usize];
        if hit.header.value_len > 0 {
            self.pm.read(
                &self.part,
                hit.offset + HEADER_SIZE + hit.header.key_len as u32,
                &mut value,
            )?;
        }
        Ok(value)
    }

    /// Appends a new live record for `key` holding `value`.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.append(key, value, 0)
    }

    /// Appends a tombstone record for `key`, hiding any earlier value.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.append(key, &[], FLAG_TOMBSTONE)
    }

    /// True if `key` has a live (non-tombstoned) record.
    #[must_use]
    pub fn exists(&self, key: &str) -> bool {
        if Self::validate_key(key).is_err() {
            return false;
        }
        let Ok(_guard) = self.lock_state() else {
            return false;
        };
        matches!(self.scan(key), Ok(Some(hit)) if !hit.header.is_tombstone())
    }

    /// Length of the live value for `key`, without reading it.
    pub fn get_len(&self, key: &str) -> Result<u32> {
        Self::validate_key(key)?;
        let _guard = self.lock_state()?;
        let hit = self.scan(key)?.ok_or(FramError::NotFound)?;
        if hit.header.is_tombstone() {
            return Err(FramError::NotFound);
        }
        Ok(hit.header.value_len as u32)
    }
}

#[cfg(test)]
mod tests;
