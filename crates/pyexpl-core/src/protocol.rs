//! Wire protocol for daemon communication
//!
//! Frames are a 4-byte big-endian length followed by a MessagePack body.

use crate::{ExecutionResult, PyexplError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest frame either side accepts
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Request to execute code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Code to run
    pub code: String,
    /// Runner id, e.g. `python3.13` or `mypy`
    pub runner: String,
}

/// Orchestration failure classes a client may want to tell apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    UnknownRunner,
    Spawn,
    Internal,
}

impl From<&PyexplError> for FailureKind {
    fn from(err: &PyexplError) -> Self {
        match err {
            PyexplError::UnknownRunner { .. } => Self::UnknownRunner,
            PyexplError::Spawn { .. } => Self::Spawn,
            _ => Self::Internal,
        }
    }
}

/// Response from execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteResponse {
    /// Whether execution succeeded
    pub success: bool,
    /// Execution result (if success)
    pub result: Option<ExecutionResult>,
    /// Failure class (if !success)
    pub failure: Option<FailureKind>,
    /// Error message (if !success)
    pub error: Option<String>,
}

impl ExecuteResponse {
    #[must_use]
    pub const fn ok(result: ExecutionResult) -> Self {
        Self {
            success: true,
            result: Some(result),
            failure: None,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(err: &PyexplError) -> Self {
        Self {
            success: false,
            result: None,
            failure: Some(err.into()),
            error: Some(err.to_string()),
        }
    }
}

/// Request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Execute code
    Execute(ExecuteRequest),
    /// List runner ids
    Runners,
    /// Get daemon status
    Status,
    /// Ping
    Ping,
}

/// Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    /// Execution result
    Execute(ExecuteResponse),
    /// Registered runner ids
    Runners { ids: Vec<String> },
    /// Daemon status
    Status {
        in_flight: u64,
        completed: u64,
        failed: u64,
    },
    /// Pong
    Pong,
    /// Error
    Error { message: String },
}

/// Encode a message to msgpack
pub fn encode<T: Serialize>(msg: &T) -> std::result::Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(msg)
}

/// Decode a message from msgpack
pub fn decode<'a, T: Deserialize<'a>>(
    data: &'a [u8],
) -> std::result::Result<T, rmp_serde::decode::Error> {
    rmp_serde::from_slice(data)
}

/// Write one length-prefixed message
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
    let body = encode(msg).map_err(|e| PyexplError::Protocol(e.to_string()))?;
    let len = frame_len(body.len())?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed message
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = check_frame_len(u32::from_be_bytes(len_bytes))?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    decode(&body).map_err(|e| PyexplError::Protocol(e.to_string()))
}

/// Validate an incoming length prefix
pub fn check_frame_len(len: u32) -> Result<usize> {
    let len = len as usize;
    if len > MAX_FRAME_SIZE {
        return Err(PyexplError::Protocol(format!("frame too large: {len} bytes")));
    }
    Ok(len)
}

/// Length prefix for an outgoing body
pub fn frame_len(len: usize) -> Result<u32> {
    if len > MAX_FRAME_SIZE {
        return Err(PyexplError::Protocol(format!("frame too large: {len} bytes")));
    }
    u32::try_from(len).map_err(|e| PyexplError::Protocol(e.to_string()))
}
