//! Error taxonomy shared by every process role.

use std::net::SocketAddr;

use crate::protocol::Status;
use crate::wire::{FrameDecodeError, FrameEncodeError};

/// Coarse classification of an [`OpError`]. Decides the wire status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Envelope could not be decoded, or names no known operation.
    Malformed,
    /// Argument missing, mistyped or out of range.
    Validation,
    /// Requested content does not exist.
    NotFound,
    /// Remote peer did not answer within the call policy.
    Unreachable,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> Status {
        match self {
            ErrorKind::Validation => Status::BadRequest,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::Malformed | ErrorKind::Unreachable | ErrorKind::Internal => {
                Status::InternalError
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpError {
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("operation not found")]
    UnknownOperation(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{addr} unreachable: {reason}")]
    Unreachable { addr: SocketAddr, reason: String },
    /// A peer answered with a non-200 status.
    #[error("remote replied {}: {message}", .status.code())]
    Remote { status: Status, message: String },
    #[error("internal error: {0}")]
    Internal(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpError::Malformed(_) | OpError::UnknownOperation(_) => ErrorKind::Malformed,
            OpError::Validation(_) => ErrorKind::Validation,
            OpError::NotFound(_) => ErrorKind::NotFound,
            OpError::Unreachable { .. } => ErrorKind::Unreachable,
            OpError::Remote { status, .. } => match status {
                Status::BadRequest => ErrorKind::Validation,
                Status::NotFound => ErrorKind::NotFound,
                Status::Ok | Status::InternalError => ErrorKind::Internal,
            },
            OpError::Internal(_) | OpError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Status to put on the wire when this error terminates a request.
    pub fn status(&self) -> Status {
        match self {
            OpError::Remote { status, .. } if *status != Status::Ok => *status,
            _ => self.kind().status(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        OpError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        OpError::NotFound(msg.into())
    }
}

impl From<FrameEncodeError> for OpError {
    fn from(e: FrameEncodeError) -> Self {
        OpError::Malformed(e.to_string())
    }
}

impl From<FrameDecodeError> for OpError {
    fn from(e: FrameDecodeError) -> Self {
        OpError::Malformed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_wire_status() {
        assert_eq!(OpError::validation("x").status(), Status::BadRequest);
        assert_eq!(OpError::not_found("x").status(), Status::NotFound);
        assert_eq!(
            OpError::UnknownOperation("NOPE".into()).status(),
            Status::InternalError
        );
        assert_eq!(
            OpError::Internal("boom".into()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn remote_status_is_preserved() {
        let e = OpError::Remote {
            status: Status::NotFound,
            message: "file not found".into(),
        };
        assert_eq!(e.status(), Status::NotFound);
        assert_eq!(e.kind(), ErrorKind::NotFound);
        assert_eq!(e.to_string(), "remote replied 404: file not found");
    }

    #[test]
    fn unknown_operation_message_is_fixed() {
        let e = OpError::UnknownOperation("FROB".into());
        assert_eq!(e.to_string(), "operation not found");
    }
}
