use std::os::fd::RawFd;
use crate::conn::Role;
use crate::socket::SockKind;

/// Protocol flavour a session is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
	TlsClient,
	TlsServer,
	DtlsClient,
	DtlsServer,
}

impl Method {
	/// TLS over streams, DTLS over datagrams.
	pub fn select(role: Role, kind: SockKind) -> Self {
		match (role, kind) {
			(Role::Client, SockKind::Stream) => Method::TlsClient,
			(Role::Server, SockKind::Stream) => Method::TlsServer,
			(Role::Client, SockKind::Datagram) => Method::DtlsClient,
			(Role::Server, SockKind::Datagram) => Method::DtlsServer,
		}
	}

	pub fn is_datagram(self) -> bool {
		matches!(self, Method::DtlsClient | Method::DtlsServer)
	}
}

/// Result of one session read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionIo {
	/// Plaintext bytes transferred.
	Done(usize),
	/// Needs the socket readable before it can continue.
	WantRead,
	/// Needs the socket writable before it can continue.
	WantWrite,
	/// The peer sent close_notify.
	ZeroReturn,
	/// Fatal; carries the library's error code.
	Failed(i32),
}

/// An encrypted session bound to one socket descriptor.
///
/// Implementations wrap a TLS library's session object. A call that
/// returns `WantRead`/`WantWrite` must later be retried with the very same
/// buffer; the transport enforces that.
pub trait EncryptedSession {
	fn read(&mut self, buf: &mut [u8]) -> SessionIo;

	fn write(&mut self, buf: &[u8]) -> SessionIo;

	/// Best-effort close_notify. The descriptor is still open.
	fn shutdown(&mut self);
}

/// Opens sessions on descriptors; holds the library context.
pub trait SessionProvider {
	fn open(&self, fd: RawFd, method: Method) -> std::io::Result<Box<dyn EncryptedSession>>;
}
