use thiserror::Error;

/// error regarding register access, on the wire or in a recording
#[derive(Error, Debug)]
pub enum Error {
    /// the link could not be opened or written, this is not recoverable by retrying
    #[error("problem with uart link")]
    Transport(std::io::Error),
    #[error("no response arrived in expected time")]
    Timeout,
    /// declared and received sizes differ
    #[error("response framing error: expected {expected} bytes, received {received}")]
    Framing {expected: usize, received: usize},
    #[error("response checksum mismatch")]
    Integrity,
    /// resynchronization handshake did not get its acknowledgement, frame alignment is still suspect
    #[error("resynchronization failed")]
    Sync,
    #[error("request of {0} bytes exceeds the synchronization budget")]
    Oversized(usize),
    /// the low bits of a request address carry its flags, so registers must be word aligned
    #[error("register address {0:#010x} is not word aligned")]
    Unaligned(u32),
    #[error("field did not reach expected value in time")]
    WaitTimeout,
    #[error("a recording is already open on this session")]
    Recording,
    /// a wait bracket was opened and never closed, or closed and never opened
    #[error("recorded trace has a dangling wait")]
    DanglingWait,
}
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Transport(error)
    }
}
