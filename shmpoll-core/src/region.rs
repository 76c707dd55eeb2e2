//! Bounds-checked views over the module's linear memory.
//!
//! ```text
//! buffer region                      control block
//! +0  status  (u32 LE)               +0   operation     (u32 LE)
//! +4  length  (u32 LE)               +4   error_code    (i32 LE)
//! +8  payload [capacity bytes]       +8   read_offset   (u32 LE)
//!                                    +12  total_read    (u32 LE)
//!                                    +16  total_written (u32 LE)
//! ```
//!
//! Offsets are validated once against the memory length when a view is built;
//! accessors take the memory slice so the module keeps ownership of it.

use std::ops::Range;

use crate::protocol::{
    BufferStatus, Operation, Status, TransferStats, CONTROL_BLOCK_SIZE, HEADER_SIZE,
};
use crate::wire::MalformedMessage;

/// Region placement that does not fit the module's memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("{name} at offset {base} spans {len} bytes, memory has {memory}")]
    OutOfBounds {
        name: &'static str,
        base: usize,
        len: usize,
        memory: usize,
    },
    #[error("buffer capacity must be non-zero")]
    ZeroCapacity,
    #[error("{0} overlaps {1}")]
    Overlap(&'static str, &'static str),
}

fn check_span(
    name: &'static str,
    base: usize,
    len: usize,
    memory: usize,
) -> Result<Range<usize>, LayoutError> {
    match base.checked_add(len) {
        Some(end) if end <= memory => Ok(base..end),
        _ => Err(LayoutError::OutOfBounds {
            name,
            base,
            len,
            memory,
        }),
    }
}

fn read_u32(mem: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([mem[at], mem[at + 1], mem[at + 2], mem[at + 3]])
}

fn write_u32(mem: &mut [u8], at: usize, v: u32) {
    mem[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// One fixed-capacity buffer: 8-byte header followed by the payload area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    name: &'static str,
    base: usize,
    capacity: usize,
}

impl Region {
    /// Validate a region of `capacity` payload bytes at `base` inside `memory_len` bytes.
    pub fn new(
        name: &'static str,
        base: usize,
        capacity: usize,
        memory_len: usize,
    ) -> Result<Self, LayoutError> {
        if capacity == 0 {
            return Err(LayoutError::ZeroCapacity);
        }
        let len = capacity
            .checked_add(HEADER_SIZE)
            .ok_or(LayoutError::OutOfBounds {
                name,
                base,
                len: usize::MAX,
                memory: memory_len,
            })?;
        check_span(name, base, len, memory_len)?;
        Ok(Self {
            name,
            base,
            capacity,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whole span, header included.
    pub fn span(&self) -> Range<usize> {
        self.base..self.base + HEADER_SIZE + self.capacity
    }

    pub fn status(&self, mem: &[u8]) -> Result<BufferStatus, MalformedMessage> {
        BufferStatus::try_from(read_u32(mem, self.base))
    }

    pub fn set_status(&self, mem: &mut [u8], status: BufferStatus) {
        write_u32(mem, self.base, status as u32);
    }

    /// Raw length word. Not clamped; callers compare it against `capacity`.
    pub fn length(&self, mem: &[u8]) -> u32 {
        read_u32(mem, self.base + 4)
    }

    pub fn set_length(&self, mem: &mut [u8], len: u32) {
        write_u32(mem, self.base + 4, len);
    }

    /// Mark the region empty with zero length.
    pub fn clear_header(&self, mem: &mut [u8]) {
        self.set_status(mem, BufferStatus::Empty);
        self.set_length(mem, 0);
    }

    pub fn payload<'m>(&self, mem: &'m [u8]) -> &'m [u8] {
        let start = self.base + HEADER_SIZE;
        &mem[start..start + self.capacity]
    }

    pub fn payload_mut<'m>(&self, mem: &'m mut [u8]) -> &'m mut [u8] {
        let start = self.base + HEADER_SIZE;
        &mut mem[start..start + self.capacity]
    }
}

/// The control block: state words plus the module's transfer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    base: usize,
}

impl ControlBlock {
    const OPERATION: usize = 0;
    const ERROR_CODE: usize = 4;
    const READ_OFFSET: usize = 8;
    const TOTAL_READ: usize = 12;
    const TOTAL_WRITTEN: usize = 16;

    pub fn new(base: usize, memory_len: usize) -> Result<Self, LayoutError> {
        check_span("control block", base, CONTROL_BLOCK_SIZE, memory_len)?;
        Ok(Self { base })
    }

    pub fn span(&self) -> Range<usize> {
        self.base..self.base + CONTROL_BLOCK_SIZE
    }

    pub fn operation(&self, mem: &[u8]) -> Result<Operation, MalformedMessage> {
        Operation::from_raw(read_u32(mem, self.base + Self::OPERATION))
    }

    pub fn set_operation(&self, mem: &mut [u8], op: Operation) {
        write_u32(mem, self.base + Self::OPERATION, op as u32);
    }

    pub fn error_code(&self, mem: &[u8]) -> i32 {
        read_u32(mem, self.base + Self::ERROR_CODE) as i32
    }

    pub fn set_error_code(&self, mem: &mut [u8], code: i32) {
        write_u32(mem, self.base + Self::ERROR_CODE, code as u32);
    }

    pub fn status(&self, mem: &[u8]) -> Result<Status, MalformedMessage> {
        Ok(Status {
            operation: self.operation(mem)?,
            error_code: self.error_code(mem),
        })
    }

    pub fn stats(&self, mem: &[u8]) -> TransferStats {
        TransferStats {
            read_offset: read_u32(mem, self.base + Self::READ_OFFSET),
            total_read: read_u32(mem, self.base + Self::TOTAL_READ),
            total_written: read_u32(mem, self.base + Self::TOTAL_WRITTEN),
        }
    }

    pub fn set_stats(&self, mem: &mut [u8], stats: TransferStats) {
        write_u32(mem, self.base + Self::READ_OFFSET, stats.read_offset);
        write_u32(mem, self.base + Self::TOTAL_READ, stats.total_read);
        write_u32(mem, self.base + Self::TOTAL_WRITTEN, stats.total_written);
    }

    /// Back to `NONE` with zeroed error code and counters.
    pub fn clear(&self, mem: &mut [u8]) {
        self.set_operation(mem, Operation::None);
        self.set_error_code(mem, 0);
        self.set_stats(mem, TransferStats::default());
    }
}

/// Reject layouts where any two spans share bytes.
pub fn check_disjoint(spans: &[(&'static str, Range<usize>)]) -> Result<(), LayoutError> {
    for (i, (a_name, a)) in spans.iter().enumerate() {
        for (b_name, b) in &spans[i + 1..] {
            if a.start < b.end && b.start < a.end {
                return Err(LayoutError::Overlap(*a_name, *b_name));
            }
        }
    }
    Ok(())
}
