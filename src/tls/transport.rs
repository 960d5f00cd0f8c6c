use std::rc::Rc;
use log::{debug, trace};
use crate::conn::{Role, Transport};
use crate::error::{SocketError, Status};
use crate::socket::Socket;
use super::session::{EncryptedSession, Method, SessionIo, SessionProvider};

/// Identity of a buffer handed to a session call that has to be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mark {
	addr: usize,
	len: usize,
}

impl Mark {
	fn of(buf: &[u8]) -> Self {
		Self {
			addr: buf.as_ptr() as usize,
			len: buf.len(),
		}
	}
}

/// A socket carrying an encrypted session.
///
/// The session is opened by `establish` once the socket is connected or
/// accepted. Want-read and want-write are reported as `ReadNotReady` and
/// `WriteNotReady` whichever direction asked, so a write stalled on a
/// handshake read arms the read timer.
///
/// When a call has to be retried, the buffer it was given is remembered;
/// a retry in the same direction with any other buffer returns
/// `InvalidBuffer` without touching the session.
pub struct TlsTransport {
	socket: Socket,
	provider: Rc<dyn SessionProvider>,
	session: Option<Box<dyn EncryptedSession>>,
	pending_read: Option<Mark>,
	pending_write: Option<Mark>,
}

impl TlsTransport {
	pub fn new(socket: Socket, provider: Rc<dyn SessionProvider>) -> Self {
		Self {
			socket,
			provider,
			session: None,
			pending_read: None,
			pending_write: None,
		}
	}

	pub fn has_session(&self) -> bool {
		self.session.is_some()
	}

	/// A read is waiting to be retried.
	pub fn is_read_pending(&self) -> bool {
		self.pending_read.is_some()
	}

	/// A write is waiting to be retried.
	pub fn is_write_pending(&self) -> bool {
		self.pending_write.is_some()
	}

	fn status(result: SessionIo, mark: Mark, pending: &mut Option<Mark>) -> Status {
		match result {
			SessionIo::Done(n) => {
				*pending = None;
				Status::Ok(n)
			}
			SessionIo::WantRead => {
				*pending = Some(mark);
				Status::ReadNotReady
			}
			SessionIo::WantWrite => {
				*pending = Some(mark);
				Status::WriteNotReady
			}
			SessionIo::ZeroReturn => {
				*pending = None;
				Status::Close
			}
			SessionIo::Failed(code) => {
				*pending = None;
				Status::Error(code)
			}
		}
	}
}

impl Transport for TlsTransport {
	fn socket(&self) -> &Socket {
		&self.socket
	}

	fn socket_mut(&mut self) -> &mut Socket {
		&mut self.socket
	}

	fn read(&mut self, buf: &mut [u8]) -> Status {
		if buf.is_empty() || !self.socket.is_open() {
			return Status::None;
		}
		let Some(session) = self.session.as_mut() else {
			return Status::None;
		};
		let mark = Mark::of(buf);
		if self.pending_read.is_some_and(|p| p != mark) {
			trace!("tls fd={} read retried with another buffer", self.socket.fd());
			return Status::InvalidBuffer;
		}
		let result = session.read(buf);
		Self::status(result, mark, &mut self.pending_read)
	}

	fn write(&mut self, buf: &[u8]) -> Status {
		if buf.is_empty() || !self.socket.is_open() {
			return Status::None;
		}
		let Some(session) = self.session.as_mut() else {
			return Status::None;
		};
		let mark = Mark::of(buf);
		if self.pending_write.is_some_and(|p| p != mark) {
			trace!("tls fd={} write retried with another buffer", self.socket.fd());
			return Status::InvalidBuffer;
		}
		let result = session.write(buf);
		Self::status(result, mark, &mut self.pending_write)
	}

	fn establish(&mut self, role: Role) -> std::io::Result<()> {
		if !self.socket.is_open() {
			return Err(SocketError::NotOpen.into());
		}
		self.shutdown();
		let method = Method::select(role, self.socket.kind());
		self.session = Some(self.provider.open(self.socket.fd(), method)?);
		debug!("tls fd={} session opened ({:?})", self.socket.fd(), method);
		Ok(())
	}

	fn shutdown(&mut self) {
		if let Some(mut session) = self.session.take() {
			session.shutdown();
			trace!("tls fd={} session shut down", self.socket.fd());
		}
		self.pending_read = None;
		self.pending_write = None;
	}
}
