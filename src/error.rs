/// Socket creation/configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket() failed: {}", errno_to_str(*.errno))]
    Create { errno: i32 },

    #[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
    Bind { errno: i32, addr: String },

    #[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
    Listen { errno: i32, backlog: i32 },

    #[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
    SetOption { errno: i32, option: &'static str },

    #[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
    GetOption { errno: i32, option: &'static str },

    #[error("invalid address: {reason}")]
    InvalidAddress { reason: &'static str },

    #[error("address family mismatch: socket is {socket}, address is {addr}")]
    FamilyMismatch { socket: &'static str, addr: &'static str },

    #[error("socket is not open")]
    NotOpen,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Why a connection was torn down.
///
/// Reported through the error hook and handed to the close hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("read timeout")]
    ReadTimeout,
    #[error("write timeout")]
    WriteTimeout,
    #[error("read error")]
    ReadError,
    #[error("write error")]
    WriteError,
    #[error("socket error")]
    SocketError,
    #[error("socket hang up")]
    SocketHangUp,
    #[error("socket closed by peer")]
    SocketClose,
    #[error("other error")]
    OtherError,
    #[error("connected check failed")]
    ConnectedCheckFailed,
    #[error("connect failed")]
    ConnectFailed,
    #[error("connect timeout")]
    ConnectTimeout,
    #[error("listen failed")]
    ListenFailed,
    #[error("accept failed")]
    AcceptFailed,
}

/// Outcome of a single I/O call.
///
/// The socket, connection and encrypted layers all speak this one taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not attempted: closed descriptor, empty buffer or invalid input.
    None,
    /// Completed; carries the byte count (zero for connect).
    Ok(usize),
    /// Non-blocking connect in flight.
    InProgress,
    /// Would block in the requested direction.
    NotReady,
    /// Needs read readiness before it can make progress.
    ReadNotReady,
    /// Needs write readiness before it can make progress.
    WriteNotReady,
    /// Retry supplied a different buffer than the pending one.
    InvalidBuffer,
    /// Orderly shutdown by the peer.
    Close,
    /// Anything else, with the errno that caused it.
    Error(i32),
}

impl Status {
    /// Maps a failed syscall's errno.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EINPROGRESS => Status::InProgress,
            e if e == libc::EAGAIN || e == libc::EWOULDBLOCK => Status::NotReady,
            e => Status::Error(e),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok(_))
    }

    /// True for every would-block flavour.
    #[inline]
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Status::NotReady | Status::ReadNotReady | Status::WriteNotReady)
    }

    /// Byte count of a completed call.
    pub fn bytes(&self) -> Option<usize> {
        match self {
            Status::Ok(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::None => f.write_str("none"),
            Status::Ok(n) => write!(f, "ok ({} bytes)", n),
            Status::InProgress => f.write_str("in progress"),
            Status::NotReady => f.write_str("not ready"),
            Status::ReadNotReady => f.write_str("read not ready"),
            Status::WriteNotReady => f.write_str("write not ready"),
            Status::InvalidBuffer => f.write_str("invalid buffer"),
            Status::Close => f.write_str("closed"),
            Status::Error(e) => write!(f, "error: {}", errno_to_str(*e)),
        }
    }
}

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Converts errno to human-readable string.
pub(crate) fn errno_to_str(errno: i32) -> String {
    match errno {
        libc::EACCES => "permission denied".into(),
        libc::EADDRINUSE => "address already in use".into(),
        libc::EADDRNOTAVAIL => "address not available".into(),
        libc::EAFNOSUPPORT => "address family not supported".into(),
        libc::EAGAIN => "resource temporarily unavailable".into(),
        libc::EBADF => "bad file descriptor".into(),
        libc::ECONNREFUSED => "connection refused".into(),
        libc::ECONNRESET => "connection reset by peer".into(),
        libc::EINPROGRESS => "operation in progress".into(),
        libc::EINTR => "interrupted by signal".into(),
        libc::EINVAL => "invalid argument".into(),
        libc::EMFILE => "too many open files".into(),
        libc::ENFILE => "file table overflow".into(),
        libc::ENETUNREACH => "network unreachable".into(),
        libc::ENOBUFS => "no buffer space available".into(),
        libc::ENOTCONN => "not connected".into(),
        libc::EPIPE => "broken pipe".into(),
        libc::ETIMEDOUT => "connection timed out".into(),
        _ => format!("errno {}", errno),
    }
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
    match errno {
        libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
        libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
        libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
        libc::EAGAIN => std::io::ErrorKind::WouldBlock,
        libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
        libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
        libc::EINTR => std::io::ErrorKind::Interrupted,
        libc::EINVAL => std::io::ErrorKind::InvalidInput,
        libc::ENOTCONN => std::io::ErrorKind::NotConnected,
        libc::EPIPE => std::io::ErrorKind::BrokenPipe,
        libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
        _ => std::io::ErrorKind::Other,
    }
}

impl From<SocketError> for std::io::Error {
    fn from(err: SocketError) -> Self {
        let kind = match &err {
            SocketError::Create { errno }
            | SocketError::Bind { errno, .. }
            | SocketError::Listen { errno, .. }
            | SocketError::SetOption { errno, .. }
            | SocketError::GetOption { errno, .. } => errno_to_kind(*errno),
            SocketError::InvalidAddress { .. } | SocketError::FamilyMismatch { .. } => {
                std::io::ErrorKind::InvalidInput
            }
            SocketError::NotOpen => std::io::ErrorKind::NotConnected,
            SocketError::InvalidState(_) => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
