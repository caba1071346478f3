use crate::error::{FramError, InvalidSizeDetail};
use crate::{range_in_bounds, Hal, Result};

/// In-memory [`Hal`] implementation, grounded on the C driver's
/// `fram_hal_mock.c` reference mock.
///
/// Backs reads and writes with a plain `Vec<u8>` and supports two fault
/// injection knobs used throughout this workspace's crash-consistency
/// tests:
///
/// - [`MockHal::fail_after`]: starting from the Nth operation (counting
///   both reads and writes), every subsequent `read`/`write` call returns
///   `FramError::Transport` instead of touching the buffer. Used to
///   simulate a device that dies mid-sequence.
/// - [`MockHal::inject_error`]: XORs a byte range of the backing buffer
///   with `0xFF` once, out of band from any HAL call. Used to simulate
///   media corruption (e.g. a CRC-guarded record) without involving the
///   fault-after-N machinery.
pub struct MockHal {
    buf: Vec<u8>,
    max_transfer: u32,
    initialized: bool,
    op_count: u64,
    fail_after: Option<u64>,
}

impl MockHal {
    /// Creates a mock backed by `capacity` zeroed bytes, with an
    /// effectively unlimited `max_transfer` (4096, matching the C mock's
    /// default chunk size).
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self::with_max_transfer(capacity, 4096)
    }

    /// Creates a mock with an explicit `max_transfer`, for exercising the
    /// device layer's chunking behavior.
    #[must_use]
    pub fn with_max_transfer(capacity: u32, max_transfer: u32) -> Self {
        Self {
            buf: vec![0u8; capacity as usize],
            max_transfer,
            initialized: false,
            op_count: 0,
            fail_after: None,
        }
    }

    /// From the next operation onward (inclusive of the `n`th), every
    /// `read`/`write` call fails with `FramError::Transport`. Operation
    /// counting starts at 0 and includes both reads and writes,
    /// `init`/`probe` excluded.
    pub fn fail_after(&mut self, n: u64) {
        self.fail_after = Some(n);
    }

    /// Clears any `fail_after` fault previously armed.
    pub fn clear_fault(&mut self) {
        self.fail_after = None;
    }

    /// XORs `len` bytes starting at `addr` with `0xFF`, corrupting them in
    /// place. Panics if the range is out of bounds — tests are expected to
    /// pick valid ranges deliberately, this is not a runtime-recoverable
    /// path.
    pub fn inject_error(&mut self, addr: u32, len: u32) {
        let start = addr as usize;
        let end = start + len as usize;
        assert!(end <= self.buf.len(), "inject_error range out of bounds");
        for byte in &mut self.buf[start..end] {
            *byte ^= 0xFF;
        }
    }

    /// Total number of `read`/`write` calls observed so far.
    #[must_use]
    pub fn op_count(&self) -> u64 {
        self.op_count
    }

    fn bump_and_check_fault(&mut self) -> Result<()> {
        let n = self.op_count;
        self.op_count += 1;
        if self.fail_after.is_some_and(|threshold| n >= threshold) {
            return Err(FramError::Transport("mock fault injected".into()));
        }
        Ok(())
    }
}

impl Hal for MockHal {
    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) {
        self.initialized = false;
    }

    fn probe(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(FramError::InvalidState("hal not initialized"));
        }
        if self.buf.is_empty() {
            return Err(FramError::Transport("no device present".into()));
        }
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.bump_and_check_fault()?;
        let len = buf.len() as u32;
        if !range_in_bounds(addr, len, self.buf.len() as u32) {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }
        let start = addr as usize;
        buf.copy_from_slice(&self.buf[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.bump_and_check_fault()?;
        let len = data.len() as u32;
        if !range_in_bounds(addr, len, self.buf.len() as u32) {
            return Err(FramError::InvalidSize(InvalidSizeDetail::OutOfRange));
        }
        let start = addr as usize;
        self.buf[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn capacity(&self) -> u32 {
        self.buf.len() as u32
    }

    fn max_transfer(&self) -> u32 {
        self.max_transfer
    }
}
