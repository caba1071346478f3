//! # Device — the sole serialized gateway to the HAL
//!
//! Every other subsystem in this workspace (partition manager, superblock,
//! ring, vslot, kvs) reaches the media exclusively through a [`Device`].
//! It owns the one [`Hal`] implementation, chunks transfers so nothing
//! ever asks the transport to move more than `max_transfer` bytes in a
//! single call, and tracks the read/write/error counters that decide
//! whether the device is still [`healthy`](Device::is_healthy).
//!
//! On top of the raw byte `read`/`write`, it also exposes `read_u8`..
//! `read_u64`/`write_u8`..`write_u64` fixed-width little-endian helpers,
//! so callers that just need a counter or a magic number don't have to
//! reach for `byteorder` themselves.
//!
//! Grounded on the reference driver's `fram_dev.c`: a `parking_lot::Mutex`
//! stands in for the C driver's FreeRTOS static semaphore, acquired with
//! `try_lock_for(mutex_timeout)` exactly where the C code calls
//! `xSemaphoreTake` with a tick timeout.

use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fram_config::Config;
use fram_hal::{FramError, Hal, Result};
use parking_lot::Mutex;

/// A snapshot of a device's counters, returned by [`Device::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub read_count: u32,
    pub write_count: u32,
    pub error_count: u32,
    pub size_bytes: u32,
    pub healthy: bool,
}

struct Inner<H> {
    hal: H,
    read_count: u32,
    write_count: u32,
    error_count: u32,
    consecutive_errors: u32,
    healthy: bool,
}

/// Serializes access to a single [`Hal`] implementation and tracks its
/// health.
///
/// Once `consecutive_errors` reaches `error_threshold` the device flips
/// unhealthy; this is one-directional — only an explicit
/// [`reset_stats`](Device::reset_stats) call clears it, a later successful
/// operation does not (mirrors `fram_dev_record_success` only zeroing the
/// *consecutive* counter, never `healthy` itself).
pub struct Device<H> {
    inner: Mutex<Inner<H>>,
    error_threshold: u32,
    mutex_timeout: Duration,
    capacity: u32,
    max_transfer: u32,
}

impl<H: Hal> Device<H> {
    /// Initializes `hal` (calling `init` then `probe`) and wraps it in a
    /// `Device`. Fails if the HAL reports zero capacity after probing,
    /// mirroring the C driver's `size_bytes == 0` rejection.
    pub fn new(mut hal: H, config: &Config) -> Result<Self> {
        hal.init()?;
        hal.probe()?;

        let capacity = hal.capacity();
        if capacity == 0 {
            return Err(FramError::InvalidState("device reports zero capacity"));
        }
        let max_transfer = if hal.max_transfer() == 0 {
            capacity
        } else {
            hal.max_transfer()
        };

        Ok(Self {
            inner: Mutex::new(Inner {
                hal,
                read_count: 0,
                write_count: 0,
                error_count: 0,
                consecutive_errors: 0,
                healthy: true,
            }),
            error_threshold: config.error_threshold,
            mutex_timeout: config.mutex_timeout,
            capacity,
            max_transfer,
        })
    }

    /// Total addressable capacity in bytes.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Whether the device is still considered healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.inner.lock().healthy
    }

    /// Returns a snapshot of the current counters.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock();
        Stats {
            read_count: inner.read_count,
            write_count: inner.write_count,
            error_count: inner.error_count,
            size_bytes: self.capacity,
            healthy: inner.healthy,
        }
    }

    /// Best-effort HAL teardown. Always marks the device unhealthy,
    /// regardless of whether the underlying `deinit` succeeds — a torn-
    /// down device has no business being used again until explicitly
    /// reset.
    pub fn deinit(&self) {
        let mut inner = self.inner.lock();
        inner.hal.deinit();
        inner.healthy = false;
        log::debug!("device deinitialized");
    }

    /// Zeroes every counter and marks the device healthy again. The only
    /// way to clear an unhealthy device.
    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.read_count = 0;
        inner.write_count = 0;
        inner.error_count = 0;
        inner.consecutive_errors = 0;
        inner.healthy = true;
        log::debug!("device stats reset, health cleared");
    }

    /// Reads `buf.len()` bytes starting at `offset`, chunked to respect
    /// `max_transfer`.
    pub fn read(&self, offset: u32, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.check_bounds(offset, buf.len() as u32)?;

        let mut inner = self.lock()?;
        let max_transfer = self.max_transfer;
        let mut addr = offset;
        let mut done = 0usize;

        while done < buf.len() {
            let chunk = (buf.len() - done).min(max_transfer as usize);
            match inner.hal.read(addr, &mut buf[done..done + chunk]) {
                Ok(()) => {
                    inner.read_count += 1;
                    inner.consecutive_errors = 0;
                    addr += chunk as u32;
                    done += chunk;
                }
                Err(e) => {
                    Self::record_error(&mut inner, self.error_threshold);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Writes `data` starting at `offset`, chunked to respect
    /// `max_transfer`.
    pub fn write(&self, offset: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_bounds(offset, data.len() as u32)?;

        let mut inner = self.lock()?;
        let max_transfer = self.max_transfer;
        let mut addr = offset;
        let mut done = 0usize;

        while done < data.len() {
            let chunk = (data.len() - done).min(max_transfer as usize);
            match inner.hal.write(addr, &data[done..done + chunk]) {
                Ok(()) => {
                    inner.write_count += 1;
                    inner.consecutive_errors = 0;
                    addr += chunk as u32;
                    done += chunk;
                }
                Err(e) => {
                    Self::record_error(&mut inner, self.error_threshold);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Reads a single byte at `offset`.
    pub fn read_u8(&self, offset: u32) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read(offset, &mut buf)?;
        Ok(buf[0])
    }

    /// Writes a single byte at `offset`.
    pub fn write_u8(&self, offset: u32, value: u8) -> Result<()> {
        self.write(offset, &[value])
    }

    /// Reads a little-endian `u16` at `offset`.
    pub fn read_u16(&self, offset: u32) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(offset, &mut buf)?;
        Ok(buf.as_slice().read_u16::<LittleEndian>().unwrap())
    }

    /// Writes `value` as little-endian bytes at `offset`.
    pub fn write_u16(&self, offset: u32, value: u16) -> Result<()> {
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_u16::<LittleEndian>(value).unwrap();
        self.write(offset, &buf)
    }

    /// Reads a little-endian `u32` at `offset`.
    pub fn read_u32(&self, offset: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(offset, &mut buf)?;
        Ok(buf.as_slice().read_u32::<LittleEndian>().unwrap())
    }

    /// Writes `value` as little-endian bytes at `offset`.
    pub fn write_u32(&self, offset: u32, value: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        (&mut buf[..]).write_u32::<LittleEndian>(value).unwrap();
        self.write(offset, &buf)
    }

    /// Reads a little-endian `u64` at `offset`.
    pub fn read_u64(&self, offset: u32) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read(offset, &mut buf)?;
        Ok(buf.as_slice().read_u64::<LittleEndian>().unwrap())
    }

    /// Writes `value` as little-endian bytes at `offset`.
    pub fn write_u64(&self, offset: u32, value: u64) -> Result<()> {
        let mut buf = [0u8; 8];
        (&mut buf[..]).write_u64::<LittleEndian>(value).unwrap();
        self.write(offset, &buf)
    }

    fn check_bounds(&self, offset: u32, len: u32) -> Result<()> {
        if !fram_hal::range_in_bounds(offset, len, self.capacity) {
            return Err(fram_hal::FramError::InvalidSize(
                fram_hal::InvalidSizeDetail::OutOfRange,
            ));
        }
        Ok(())
    }

    fn lock(&self) -> Result<parking_lot::MutexGuard<'_, Inner<H>>> {
        self.inner
            .try_lock_for(self.mutex_timeout)
            .ok_or(FramError::Timeout)
    }

    fn record_error(inner: &mut Inner<H>, threshold: u32) {
        inner.error_count += 1;
        inner.consecutive_errors += 1;
        if inner.consecutive_errors >= threshold && inner.healthy {
            inner.healthy = false;
            log::warn!(
                "device unhealthy after {} consecutive errors",
                inner.consecutive_errors
            );
        }
    }
}
