//! Shared-memory protocol: layout constants, control-block states, message types.

use serde::{Deserialize, Serialize};

use crate::wire::MalformedMessage;

/// Current protocol version. Exported over the C ABI so hosts can check compatibility.
pub const PROTOCOL_VERSION: u8 = 1;

/// Bytes reserved at the front of every buffer region: status (u32 LE) + length (u32 LE).
pub const HEADER_SIZE: usize = 8;

/// Default payload capacity of each buffer region.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024; // 64 KiB

/// Control block: operation, error_code, read_offset, total_read, total_written (u32 LE each).
pub const CONTROL_BLOCK_SIZE: usize = 5 * 4;

/// Module error code: processing entry point found no input.
pub const ERR_NO_INPUT: i32 = -1;
/// Module error code: response did not fit in the output region.
pub const ERR_OUTPUT_FULL: i32 = -2;
/// Module error code: a streamed row did not fit in the output region.
/// Covers the frame header and the row data alike, since a row is framed
/// and written in one piece.
pub const ERR_ROW_TOO_LARGE: i32 = -3;
/// Module error code: processing was invoked while an exchange was already in flight.
pub const ERR_NOT_IDLE: i32 = -4;

/// Operation state held in the first word of the control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Operation {
    /// Idle.
    None = 0,
    /// Input is ready for the module to read.
    ReadRequest = 1,
    /// Module has flushed output for the host.
    WriteReady = 2,
    /// Processing finished successfully.
    Completed = 3,
    /// Processing failed; see `error_code`.
    Error = 4,
}

impl Operation {
    /// True for the states that end a round-trip.
    pub fn is_terminal(self) -> bool {
        matches!(self, Operation::Completed | Operation::Error)
    }

    /// True when the module may be invoked.
    pub fn is_idle(self) -> bool {
        matches!(self, Operation::None | Operation::ReadRequest)
    }

    /// Decode the raw control-block word.
    pub fn from_raw(raw: u32) -> Result<Self, MalformedMessage> {
        match raw {
            0 => Ok(Operation::None),
            1 => Ok(Operation::ReadRequest),
            2 => Ok(Operation::WriteReady),
            3 => Ok(Operation::Completed),
            4 => Ok(Operation::Error),
            other => Err(MalformedMessage::UnknownOperation(other)),
        }
    }
}

/// Buffer header status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum BufferStatus {
    Empty = 0,
    Ready = 1,
    Processing = 2,
}

impl TryFrom<u32> for BufferStatus {
    type Error = MalformedMessage;

    fn try_from(raw: u32) -> Result<Self, MalformedMessage> {
        match raw {
            0 => Ok(BufferStatus::Empty),
            1 => Ok(BufferStatus::Ready),
            2 => Ok(BufferStatus::Processing),
            other => Err(MalformedMessage::UnknownStatus(other)),
        }
    }
}

/// Message type byte. Closed set; anything else fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Query = b'Q',
    /// Single-shot response produced by `process_message`.
    Response = b'R',
    /// One row of a streamed result.
    DataRow = b'D',
    CommandComplete = b'C',
    ReadyForQuery = b'Z',
    ErrorResponse = b'E',
    Terminate = b'X',
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = MalformedMessage;

    fn try_from(tag: u8) -> Result<Self, MalformedMessage> {
        match tag {
            b'Q' => Ok(MessageType::Query),
            b'R' => Ok(MessageType::Response),
            b'D' => Ok(MessageType::DataRow),
            b'C' => Ok(MessageType::CommandComplete),
            b'Z' => Ok(MessageType::ReadyForQuery),
            b'E' => Ok(MessageType::ErrorResponse),
            b'X' => Ok(MessageType::Terminate),
            other => Err(MalformedMessage::UnknownType(other)),
        }
    }
}

/// Snapshot of the control block's state words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub operation: Operation,
    /// Meaningful only when `operation == Operation::Error`.
    pub error_code: i32,
}

/// Transfer counters kept by the module alongside the state words.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub read_offset: u32,
    pub total_read: u32,
    pub total_written: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_from_raw() {
        for op in [
            Operation::None,
            Operation::ReadRequest,
            Operation::WriteReady,
            Operation::Completed,
            Operation::Error,
        ] {
            assert_eq!(Operation::from_raw(op as u32).unwrap(), op);
        }
        assert_eq!(
            Operation::from_raw(5),
            Err(MalformedMessage::UnknownOperation(5))
        );
    }

    #[test]
    fn terminal_and_idle_states() {
        assert!(Operation::Completed.is_terminal());
        assert!(Operation::Error.is_terminal());
        assert!(!Operation::WriteReady.is_terminal());
        assert!(Operation::None.is_idle());
        assert!(Operation::ReadRequest.is_idle());
        assert!(!Operation::Completed.is_idle());
    }

    #[test]
    fn unknown_message_type_rejected() {
        assert_eq!(MessageType::try_from(b'D').unwrap(), MessageType::DataRow);
        assert_eq!(
            MessageType::try_from(b'?'),
            Err(MalformedMessage::UnknownType(b'?'))
        );
    }

    #[test]
    fn unknown_status_rejected() {
        assert_eq!(BufferStatus::try_from(1).unwrap(), BufferStatus::Ready);
        assert!(BufferStatus::try_from(7).is_err());
    }
}
