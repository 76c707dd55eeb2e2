//! Reference module: echoes queries back uppercased and streams numbered rows.
//! Deterministic, so hosts and tests can check exact output.

use log::trace;

use crate::module::{Module, ModuleBuffers};
use crate::protocol::{
    MessageType, Operation, ERR_NOT_IDLE, ERR_NO_INPUT, ERR_OUTPUT_FULL, ERR_ROW_TOO_LARGE,
};
use crate::region::LayoutError;

/// Rows still to be produced by `process_multiple`, one per acknowledged chunk.
#[derive(Debug, Clone, Copy)]
struct PendingRows {
    next: u32,
    total: u32,
}

pub struct EchoModule {
    buffers: ModuleBuffers,
    pending: Option<PendingRows>,
}

/// Payload of row `index` (1-based) out of `total`.
pub fn row_text(index: u32, total: u32) -> String {
    format!("Row {} of {}\n", index, total)
}

impl EchoModule {
    pub fn new(capacity: usize) -> Result<Self, LayoutError> {
        Ok(Self {
            buffers: ModuleBuffers::new(capacity)?,
            pending: None,
        })
    }

    pub fn buffers(&self) -> &ModuleBuffers {
        &self.buffers
    }

    /// Write and publish one row. On failure the module enters `ERROR` with
    /// `ERR_ROW_TOO_LARGE`.
    fn emit_row(&mut self, index: u32, total: u32) -> bool {
        let row = row_text(index, total);
        if self
            .buffers
            .write_message(MessageType::DataRow, row.as_bytes())
            .is_err()
        {
            self.pending = None;
            self.buffers.fail(ERR_ROW_TOO_LARGE);
            return false;
        }
        self.buffers.flush();
        trace!("echo: row {} of {} ready", index, total);
        true
    }
}

impl Module for EchoModule {
    fn memory(&self) -> &[u8] {
        self.buffers.memory()
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        self.buffers.memory_mut()
    }

    fn input_buffer(&self) -> u32 {
        self.buffers.input_base()
    }

    fn output_buffer(&self) -> u32 {
        self.buffers.output_base()
    }

    fn control_block(&self) -> u32 {
        self.buffers.control_base()
    }

    fn buffer_size(&self) -> u32 {
        self.buffers.capacity()
    }

    fn reset_buffers(&mut self) {
        self.pending = None;
        self.buffers.reset();
    }

    fn signal_input_ready(&mut self, length: u32) {
        self.buffers.signal_input_ready(length);
    }

    fn has_output(&self) -> bool {
        self.buffers.has_output()
    }

    fn output_length(&self) -> u32 {
        self.buffers.output_length()
    }

    /// Clears the output region, then produces the next pending row if any.
    fn ack_output(&mut self) {
        self.buffers.ack_output();
        let Some(rows) = self.pending else {
            return;
        };
        self.pending = (rows.next < rows.total).then(|| PendingRows {
            next: rows.next + 1,
            total: rows.total,
        });
        if self.emit_row(rows.next, rows.total) {
            self.buffers.set_operation(Operation::Completed);
        }
    }

    fn process_message(&mut self) -> i32 {
        if !self.buffers.is_idle() {
            self.buffers.fail(ERR_NOT_IDLE);
            return -1;
        }
        let mut query = vec![0u8; self.buffers.capacity() as usize];
        let n = self.buffers.read_input(&mut query);
        if n == 0 {
            self.buffers.fail(ERR_NO_INPUT);
            return -1;
        }
        query.truncate(n);
        query.make_ascii_uppercase();
        if self
            .buffers
            .write_message(MessageType::Response, &query)
            .is_err()
        {
            self.buffers.fail(ERR_OUTPUT_FULL);
            return -1;
        }
        self.buffers.flush();
        self.buffers.set_operation(Operation::Completed);
        0
    }

    fn process_multiple(&mut self, count: u32) -> Option<i32> {
        if !self.buffers.is_idle() {
            self.buffers.fail(ERR_NOT_IDLE);
            return Some(-1);
        }
        self.pending = None;
        if count > 0 {
            self.pending = (count > 1).then_some(PendingRows {
                next: 2,
                total: count,
            });
            if !self.emit_row(1, count) {
                return Some(-1);
            }
        }
        self.buffers.set_operation(Operation::Completed);
        Some(0)
    }
}
