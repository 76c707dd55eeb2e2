//! Module side of the protocol: the export surface a host drives, and the
//! buffer primitives a module uses to implement it.

use log::warn;

use crate::protocol::{
    BufferStatus, MessageType, Operation, Status, TransferStats, CONTROL_BLOCK_SIZE, HEADER_SIZE,
};
use crate::region::{ControlBlock, LayoutError, Region};
use crate::wire::{self, EncodeError, MalformedMessage};

/// Exports the host needs from a computation module.
///
/// Offsets index into `memory()`, which the module owns for its whole lifetime.
/// Every call runs to completion before returning; the module never calls back
/// into the host, it only flips state the host inspects afterwards.
pub trait Module {
    fn memory(&self) -> &[u8];
    fn memory_mut(&mut self) -> &mut [u8];

    /// Offset of the input region header.
    fn input_buffer(&self) -> u32;
    /// Offset of the output region header.
    fn output_buffer(&self) -> u32;
    /// Offset of the control block.
    fn control_block(&self) -> u32;
    /// Payload capacity of each buffer region.
    fn buffer_size(&self) -> u32;

    fn reset_buffers(&mut self);
    fn signal_input_ready(&mut self, length: u32);
    fn has_output(&self) -> bool;
    fn output_length(&self) -> u32;
    fn ack_output(&mut self);

    /// Consume the input and produce a response. 0 on success; on failure the
    /// control block holds `ERROR` and the error code.
    fn process_message(&mut self) -> i32;

    /// Produce `count` output units, one per `ack_output`. `None` when the
    /// module does not export this entry point.
    fn process_multiple(&mut self, _count: u32) -> Option<i32> {
        None
    }
}

/// Output region has no room for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("output buffer full: need {needed} bytes, {available} free")]
pub struct BufferFull {
    pub needed: usize,
    pub available: usize,
}

/// Leading bytes left unused so no region sits at offset 0.
const RESERVED: usize = 16;

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Linear memory holding the control block and both buffer regions.
///
/// Memory is allocated once and never grows, so raw pointers handed out over
/// the C ABI stay valid for the lifetime of the value.
pub struct ModuleBuffers {
    memory: Vec<u8>,
    input: Region,
    output: Region,
    control: ControlBlock,
}

impl ModuleBuffers {
    /// Lay out control block, input and output regions of `capacity` bytes each.
    pub fn new(capacity: usize) -> Result<Self, LayoutError> {
        if capacity == 0 {
            return Err(LayoutError::ZeroCapacity);
        }
        // Offsets are exported as u32, like wasm32 pointers.
        if capacity > u32::MAX as usize / 4 {
            return Err(LayoutError::OutOfBounds {
                name: "buffer capacity",
                base: 0,
                len: capacity,
                memory: u32::MAX as usize,
            });
        }
        let control_base = RESERVED;
        let input_base = align8(control_base + CONTROL_BLOCK_SIZE);
        let output_base = align8(input_base + HEADER_SIZE + capacity);
        let memory_len = align8(output_base + HEADER_SIZE + capacity);
        let memory = vec![0u8; memory_len];
        let control = ControlBlock::new(control_base, memory_len)?;
        let input = Region::new("input buffer", input_base, capacity, memory_len)?;
        let output = Region::new("output buffer", output_base, capacity, memory_len)?;
        let mut buffers = Self {
            memory,
            input,
            output,
            control,
        };
        buffers.reset();
        Ok(buffers)
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u8] {
        &mut self.memory
    }

    pub fn input_base(&self) -> u32 {
        self.input.span().start as u32
    }

    pub fn output_base(&self) -> u32 {
        self.output.span().start as u32
    }

    pub fn control_base(&self) -> u32 {
        self.control.span().start as u32
    }

    pub fn capacity(&self) -> u32 {
        self.input.capacity() as u32
    }

    /// Clear both headers and the control block.
    pub fn reset(&mut self) {
        self.input.clear_header(&mut self.memory);
        self.output.clear_header(&mut self.memory);
        self.control.clear(&mut self.memory);
    }

    /// Record the input length, mark it ready and rewind the read cursor.
    /// Moves an idle control block to `READ_REQUEST`; any other state is left
    /// alone so a stale exchange stays visible.
    ///
    /// A length above capacity is clamped to capacity and logged at warn level.
    pub fn signal_input_ready(&mut self, length: u32) {
        let capacity = self.capacity();
        if length > capacity {
            warn!(
                "module: input length {} clamped to capacity {}",
                length, capacity
            );
        }
        let length = length.min(capacity);
        self.input.set_length(&mut self.memory, length);
        self.input.set_status(&mut self.memory, BufferStatus::Ready);
        let mut stats = self.control.stats(&self.memory);
        stats.read_offset = 0;
        self.control.set_stats(&mut self.memory, stats);
        if let Ok(Operation::None) = self.control.operation(&self.memory) {
            self.control
                .set_operation(&mut self.memory, Operation::ReadRequest);
        }
    }

    pub fn has_output(&self) -> bool {
        matches!(self.output.status(&self.memory), Ok(BufferStatus::Ready))
    }

    pub fn output_length(&self) -> u32 {
        self.output.length(&self.memory)
    }

    pub fn ack_output(&mut self) {
        self.output.clear_header(&mut self.memory);
    }

    pub fn status(&self) -> Result<Status, MalformedMessage> {
        self.control.status(&self.memory)
    }

    pub fn stats(&self) -> TransferStats {
        self.control.stats(&self.memory)
    }

    /// True while the processing entry point may run.
    pub fn is_idle(&self) -> bool {
        self.control
            .operation(&self.memory)
            .map(Operation::is_idle)
            .unwrap_or(false)
    }

    /// Copy pending input into `buf`. Returns 0 when no input is ready or all of
    /// it has been consumed.
    pub fn read_input(&mut self, buf: &mut [u8]) -> usize {
        if !matches!(self.input.status(&self.memory), Ok(BufferStatus::Ready)) {
            return 0;
        }
        let len = (self.input.length(&self.memory) as usize).min(self.input.capacity());
        let mut stats = self.control.stats(&self.memory);
        let offset = stats.read_offset as usize;
        let available = len.saturating_sub(offset);
        if available == 0 {
            self.input.set_status(&mut self.memory, BufferStatus::Empty);
            return 0;
        }
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.input.payload(&self.memory)[offset..offset + n]);
        stats.read_offset += n as u32;
        stats.total_read = stats.total_read.wrapping_add(n as u32);
        self.control.set_stats(&mut self.memory, stats);
        if offset + n >= len {
            self.input.set_status(&mut self.memory, BufferStatus::Empty);
        }
        n
    }

    /// Append raw bytes to the output region.
    ///
    /// On overflow nothing is written; output already pending is flushed so the
    /// host can drain it.
    pub fn write_output(&mut self, bytes: &[u8]) -> Result<usize, BufferFull> {
        let used = self.output_length() as usize;
        let available = self.output.capacity().saturating_sub(used);
        if bytes.len() > available {
            self.flush();
            return Err(BufferFull {
                needed: bytes.len(),
                available,
            });
        }
        self.output.payload_mut(&mut self.memory)[used..used + bytes.len()].copy_from_slice(bytes);
        self.output
            .set_length(&mut self.memory, (used + bytes.len()) as u32);
        let mut stats = self.control.stats(&self.memory);
        stats.total_written = stats.total_written.wrapping_add(bytes.len() as u32);
        self.control.set_stats(&mut self.memory, stats);
        Ok(bytes.len())
    }

    /// Frame `payload` and append it to the output region.
    pub fn write_message(&mut self, ty: MessageType, payload: &[u8]) -> Result<usize, BufferFull> {
        let frame = wire::encode(ty, payload).map_err(|e| match e {
            EncodeError::NoRoom { needed, available } => BufferFull { needed, available },
            EncodeError::TooLarge(len) => BufferFull {
                needed: len + wire::MIN_FRAME_LEN,
                available: self.output.capacity(),
            },
        })?;
        self.write_output(&frame)
    }

    /// Publish whatever has been written so far.
    pub fn flush(&mut self) {
        if self.output_length() > 0 {
            self.output.set_status(&mut self.memory, BufferStatus::Ready);
            self.control
                .set_operation(&mut self.memory, Operation::WriteReady);
        }
    }

    pub fn set_operation(&mut self, op: Operation) {
        self.control.set_operation(&mut self.memory, op);
    }

    /// Enter `ERROR` with `code`.
    pub fn fail(&mut self, code: i32) {
        self.control.set_error_code(&mut self.memory, code);
        self.control.set_operation(&mut self.memory, Operation::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_input(b: &mut ModuleBuffers, data: &[u8]) {
        let base = b.input_base() as usize + HEADER_SIZE;
        b.memory_mut()[base..base + data.len()].copy_from_slice(data);
        b.signal_input_ready(data.len() as u32);
    }

    #[test]
    fn layout_is_disjoint_and_in_bounds() {
        let b = ModuleBuffers::new(64).unwrap();
        let control = b.control_base() as usize;
        let input = b.input_base() as usize;
        let output = b.output_base() as usize;
        assert!(control >= RESERVED);
        assert!(control + CONTROL_BLOCK_SIZE <= input);
        assert!(input + HEADER_SIZE + 64 <= output);
        assert!(output + HEADER_SIZE + 64 <= b.memory().len());
        assert_eq!(b.capacity(), 64);
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(ModuleBuffers::new(0).is_err());
    }

    #[test]
    fn signal_moves_idle_to_read_request() {
        let mut b = ModuleBuffers::new(32).unwrap();
        ready_input(&mut b, b"abc");
        assert_eq!(b.status().unwrap().operation, Operation::ReadRequest);
        b.set_operation(Operation::Completed);
        ready_input(&mut b, b"abc");
        assert_eq!(b.status().unwrap().operation, Operation::Completed);
    }

    #[test]
    fn read_input_in_pieces() {
        let mut b = ModuleBuffers::new(32).unwrap();
        ready_input(&mut b, b"hello world");
        let mut buf = [0u8; 5];
        assert_eq!(b.read_input(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(b.read_input(&mut buf), 5);
        assert_eq!(&buf, b" worl");
        assert_eq!(b.read_input(&mut buf), 1);
        assert_eq!(buf[0], b'd');
        assert_eq!(b.read_input(&mut buf), 0);
        let stats = b.stats();
        assert_eq!(stats.read_offset, 11);
        assert_eq!(stats.total_read, 11);
    }

    #[test]
    fn read_without_signal_returns_zero() {
        let mut b = ModuleBuffers::new(32).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(b.read_input(&mut buf), 0);
    }

    #[test]
    fn write_overflow_marks_ready_without_writing() {
        let mut b = ModuleBuffers::new(8).unwrap();
        assert_eq!(b.write_output(b"12345"), Ok(5));
        assert!(!b.has_output());
        assert_eq!(
            b.write_output(b"6789"),
            Err(BufferFull {
                needed: 4,
                available: 3
            })
        );
        assert!(b.has_output());
        assert_eq!(b.output_length(), 5);
        assert_eq!(b.status().unwrap().operation, Operation::WriteReady);
        assert_eq!(b.stats().total_written, 5);
    }

    #[test]
    fn overflow_on_empty_output_publishes_nothing() {
        let mut b = ModuleBuffers::new(8).unwrap();
        assert!(b.write_output(b"123456789").is_err());
        assert!(!b.has_output());
        assert_eq!(b.output_length(), 0);
        assert_eq!(b.status().unwrap().operation, Operation::None);
    }

    #[test]
    fn oversized_signal_is_clamped() {
        let mut b = ModuleBuffers::new(4).unwrap();
        ready_input(&mut b, b"abcd");
        b.signal_input_ready(100);
        let mut buf = [0u8; 16];
        assert_eq!(b.read_input(&mut buf), 4);
        assert_eq!(&buf[..4], b"abcd");
    }

    #[test]
    fn flush_only_publishes_nonempty_output() {
        let mut b = ModuleBuffers::new(16).unwrap();
        b.flush();
        assert!(!b.has_output());
        assert_eq!(b.status().unwrap().operation, Operation::None);
        b.write_message(MessageType::DataRow, b"x").unwrap();
        b.flush();
        assert!(b.has_output());
        assert_eq!(b.output_length(), 6);
        b.ack_output();
        assert!(!b.has_output());
        assert_eq!(b.output_length(), 0);
    }

    #[test]
    fn fail_sets_error_state() {
        let mut b = ModuleBuffers::new(16).unwrap();
        b.fail(-7);
        assert_eq!(
            b.status().unwrap(),
            Status {
                operation: Operation::Error,
                error_code: -7
            }
        );
        assert!(!b.is_idle());
        b.reset();
        assert!(b.is_idle());
        assert_eq!(b.status().unwrap().error_code, 0);
    }
}
