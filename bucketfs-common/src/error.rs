use std::fmt;

/// The filesystem operation that failed.
///
/// Every failure surfaced by a [`FileSystem`](crate::filesystem::FileSystem)
/// carries one of these so callers can branch on what was attempted rather
/// than on the backend's error shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ClientInit,
    Config,
    Write,
    Append,
    Copy,
    Move,
    Upload,
    Exists,
    Read,
    Delete,
    MkDir,
    LastModified,
    FileSize,
    List,
    Presign,
}

impl Operation {
    pub fn label(self) -> &'static str {
        match self {
            Operation::ClientInit => "client-init",
            Operation::Config => "config",
            Operation::Write => "write",
            Operation::Append => "append",
            Operation::Copy => "copy",
            Operation::Move => "move",
            Operation::Upload => "upload",
            Operation::Exists => "exists-check",
            Operation::Read => "read",
            Operation::Delete => "delete",
            Operation::MkDir => "mkdir",
            Operation::LastModified => "last-modified",
            Operation::FileSize => "file-size",
            Operation::List => "list",
            Operation::Presign => "presign",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Adapter-level error: the failing operation plus the backend's own message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} error: {message}")]
pub struct FsError {
    operation: Operation,
    message: String,
}

impl FsError {
    pub fn new(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type FsResult<T> = Result<T, FsError>;
