//! Shared-memory polling protocol between a host and an embedded module.
//! No callbacks: the host writes input, makes one blocking call, then reads
//! the control block and drains output from regions the module owns.

pub mod driver;
pub mod echo;
pub mod ffi;
pub mod module;
pub mod protocol;
pub mod region;
pub mod wire;

pub use driver::{DriverError, HostDriver};
pub use echo::EchoModule;
pub use module::{BufferFull, Module, ModuleBuffers};
pub use protocol::{
    BufferStatus, MessageType, Operation, Status, TransferStats, DEFAULT_BUFFER_SIZE,
    HEADER_SIZE, PROTOCOL_VERSION,
};
pub use region::{ControlBlock, LayoutError, Region};
pub use wire::{decode, decode_all, encode, encode_into, EncodeError, MalformedMessage, Message, OwnedMessage};
