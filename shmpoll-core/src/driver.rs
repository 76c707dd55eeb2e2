//! Host driver: writes requests, invokes the module, polls the control block and
//! drains responses. The only place that loops waiting on module state.

use log::{debug, trace, warn};

use crate::module::Module;
use crate::protocol::{BufferStatus, Operation, Status, TransferStats};
use crate::region::{check_disjoint, ControlBlock, LayoutError, Region};
use crate::wire::{self, MalformedMessage, OwnedMessage};

/// Failure of a driver operation. Nothing is retried; after any error the
/// regions must be reset before reuse (`exec` does this itself).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("input of {len} bytes exceeds buffer capacity of {capacity}")]
    InputTooLarge { len: usize, capacity: usize },
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MalformedMessage),
    #[error("module reported error code {0}")]
    ProcessingFailed(i32),
    #[error("module completed without producing output")]
    NoOutput,
    #[error("output length {length} exceeds buffer capacity of {capacity}")]
    OutputOutOfBounds { length: u32, capacity: usize },
    #[error("module reports {reported} output bytes but header holds {header}")]
    LengthMismatch { reported: u32, header: u32 },
    #[error("previous exchange still in state {0:?}; reset first")]
    ExchangeInFlight(Operation),
    #[error("module returned in non-terminal state {0:?}")]
    NotTerminal(Operation),
    #[error("module does not export {0}")]
    Unsupported(&'static str),
    #[error("bad module layout: {0}")]
    Layout(#[from] LayoutError),
}

/// Drives one module over its shared regions. Holds the module by value, so
/// host and module can never touch the regions at the same time.
pub struct HostDriver<M: Module> {
    module: M,
    input: Region,
    output: Region,
    control: ControlBlock,
}

impl<M: Module> HostDriver<M> {
    /// Read the module's offset exports once and validate them against its memory.
    pub fn new(module: M) -> Result<Self, DriverError> {
        let memory_len = module.memory().len();
        let capacity = module.buffer_size() as usize;
        let input = Region::new(
            "input buffer",
            module.input_buffer() as usize,
            capacity,
            memory_len,
        )?;
        let output = Region::new(
            "output buffer",
            module.output_buffer() as usize,
            capacity,
            memory_len,
        )?;
        let control = ControlBlock::new(module.control_block() as usize, memory_len)?;
        check_disjoint(&[
            (input.name(), input.span()),
            (output.name(), output.span()),
            ("control block", control.span()),
        ])?;
        debug!(
            "driver: input {:?}, output {:?}, control {:?}, capacity {}",
            input.span(),
            output.span(),
            control.span(),
            capacity
        );
        Ok(Self {
            module,
            input,
            output,
            control,
        })
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn into_inner(self) -> M {
        self.module
    }

    /// Payload capacity of each region.
    pub fn capacity(&self) -> usize {
        self.input.capacity()
    }

    /// Copy `data` into the input region and signal it ready.
    /// Oversized input is rejected before anything is written.
    pub fn write_input(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let capacity = self.input.capacity();
        if data.len() > capacity {
            return Err(DriverError::InputTooLarge {
                len: data.len(),
                capacity,
            });
        }
        self.input.payload_mut(self.module.memory_mut())[..data.len()].copy_from_slice(data);
        self.module.signal_input_ready(data.len() as u32);
        trace!("driver: wrote {} input bytes", data.len());
        Ok(())
    }

    /// Take the pending output chunk, if any, and acknowledge it so the module
    /// may produce the next one.
    pub fn read_output(&mut self) -> Result<Option<Vec<u8>>, DriverError> {
        if !self.module.has_output() {
            return Ok(None);
        }
        let reported = self.module.output_length();
        let header = self.output.length(self.module.memory());
        if reported != header {
            return Err(DriverError::LengthMismatch { reported, header });
        }
        let capacity = self.output.capacity();
        if reported as usize > capacity {
            return Err(DriverError::OutputOutOfBounds {
                length: reported,
                capacity,
            });
        }
        let chunk = self.output.payload(self.module.memory())[..reported as usize].to_vec();
        self.module.ack_output();
        trace!("driver: drained {} output bytes", chunk.len());
        Ok(Some(chunk))
    }

    /// Output length as reported by the module.
    pub fn output_length(&self) -> u32 {
        self.module.output_length()
    }

    pub fn has_output(&self) -> bool {
        self.module.has_output()
    }

    /// True while input has been signalled but not fully consumed.
    pub fn input_pending(&self) -> Result<bool, DriverError> {
        Ok(self.input.status(self.module.memory())? == BufferStatus::Ready)
    }

    /// Control block state words, read verbatim.
    pub fn get_status(&self) -> Result<Status, DriverError> {
        Ok(self.control.status(self.module.memory())?)
    }

    pub fn transfer_stats(&self) -> TransferStats {
        self.control.stats(self.module.memory())
    }

    /// Clear both regions and the control block. Safe to call at any time.
    pub fn reset(&mut self) {
        self.module.reset_buffers();
    }

    fn ensure_idle(&self) -> Result<(), DriverError> {
        let op = self.control.operation(self.module.memory())?;
        if !op.is_idle() {
            warn!("driver: refusing to invoke module in state {:?}", op);
            return Err(DriverError::ExchangeInFlight(op));
        }
        Ok(())
    }

    /// Map the entry point's return code and the control block to an outcome.
    fn finish(&self, rc: i32) -> Result<Status, DriverError> {
        let status = self.get_status()?;
        if status.operation == Operation::Error {
            warn!("driver: module failed with code {}", status.error_code);
            return Err(DriverError::ProcessingFailed(status.error_code));
        }
        if rc != 0 {
            warn!("driver: module returned {} in state {:?}", rc, status.operation);
            return Err(DriverError::ProcessingFailed(rc));
        }
        if status.operation != Operation::Completed {
            return Err(DriverError::NotTerminal(status.operation));
        }
        Ok(status)
    }

    /// Invoke the single-message entry point and check the terminal state.
    pub fn process_message(&mut self) -> Result<Status, DriverError> {
        self.ensure_idle()?;
        let rc = self.module.process_message();
        self.finish(rc)
    }

    /// Invoke the multi-unit entry point. Output is drained with `read_output`.
    pub fn process_multiple(&mut self, count: u32) -> Result<Status, DriverError> {
        self.ensure_idle()?;
        let rc = self
            .module
            .process_multiple(count)
            .ok_or(DriverError::Unsupported("process_multiple"))?;
        self.finish(rc)
    }

    /// Call `read_output` until the module has nothing more to give.
    pub fn drain(&mut self) -> Result<Vec<Vec<u8>>, DriverError> {
        let mut chunks = Vec::new();
        while let Some(chunk) = self.read_output()? {
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    /// One full round-trip: reset, write, process, read.
    pub fn exec(&mut self, message: &[u8]) -> Result<Vec<u8>, DriverError> {
        debug!("driver: exec {} bytes", message.len());
        self.reset();
        self.write_input(message)?;
        self.process_message()?;
        match self.read_output()? {
            Some(out) if !out.is_empty() => Ok(out),
            _ => Err(DriverError::NoOutput),
        }
    }

    /// `exec`, then split the response into messages.
    pub fn exec_messages(&mut self, message: &[u8]) -> Result<Vec<OwnedMessage>, DriverError> {
        let out = self.exec(message)?;
        Ok(wire::decode_all(&out)?)
    }

    /// Streaming round-trip: reset, write, ask for `count` units, drain every chunk.
    pub fn exec_streaming(
        &mut self,
        message: &[u8],
        count: u32,
    ) -> Result<Vec<Vec<u8>>, DriverError> {
        debug!("driver: exec_streaming {} bytes, {} units", message.len(), count);
        self.reset();
        self.write_input(message)?;
        self.process_multiple(count)?;
        let chunks = self.drain()?;
        // A unit that fails mid-stream leaves the module in ERROR.
        self.finish(0)?;
        debug!("driver: drained {} chunks", chunks.len());
        Ok(chunks)
    }
}
