//! Parent↔child IPC: length-prefixed frames carrying typed envelopes.
//!
//! The child's stdout is reserved exclusively for this protocol; stderr
//! stays free-form text for logs.

pub mod codec;
pub mod messages;

pub use codec::{CodecError, FrameReader, FrameWriter, MAX_MESSAGE_SIZE};
pub use messages::{
    decode, encode, ErrorPayload, IpcMessage, LogLevel, LogPayload, MessageType, SessionStatus,
    StartSessionPayload, StatusPayload, StopSessionPayload,
};
