mod io;
mod options;

pub use self::options::{set_reuse_addr, set_reuse_port, set_tcp_nodelay, set_linger,
						set_recv_buffer_size, set_send_buffer_size,
						set_keepalive, set_keepalive_idle, set_keepalive_interval, set_keepalive_count,
						socket_error, socket_type};

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use log::trace;
use crate::addr::{Family, SockAddr, ToSockAddr};
use crate::error::{SocketError, Status, errno};

/// Transport kind of a socket.
///
/// - `Stream`: reliable, ordered byte stream (TCP, Unix stream)
/// - `Datagram`: unreliable packets with boundaries (UDP, Unix datagram)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockKind {
	Stream,
	Datagram,
}

impl SockKind {
	/// Returns the libc constant for this socket type.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			SockKind::Stream => libc::SOCK_STREAM,
			SockKind::Datagram => libc::SOCK_DGRAM,
		}
	}

	pub fn from_raw(raw: libc::c_int) -> Option<Self> {
		match raw {
			libc::SOCK_STREAM => Some(SockKind::Stream),
			libc::SOCK_DGRAM => Some(SockKind::Datagram),
			_ => None,
		}
	}
}

/*
 ---
  ┌──────────┬─────────────┬────────────────────────────────────────┐
  │   Kind   │  Constant   │               Guarantees               │
  ├──────────┼─────────────┼────────────────────────────────────────┤
  │ Stream   │ SOCK_STREAM │ Ordered, reliable, no boundaries       │
  ├──────────┼─────────────┼────────────────────────────────────────┤
  │ Datagram │ SOCK_DGRAM  │ Fast, no guarantees, packet boundaries │
  └──────────┴─────────────┴────────────────────────────────────────┘
 ---
*/

/// A non-blocking socket and the addresses it is known by.
///
/// Owns at most one descriptor. Every descriptor it holds is non-blocking
/// and close-on-exec. The family is fixed once the descriptor exists;
/// binding or connecting to an address of another family is refused.
///
/// I/O calls never return `std::io::Error`: they report a [`Status`] so
/// callers can tell would-block apart from peer close and hard failure.
#[derive(Debug)]
pub struct Socket {
	fd: Option<OwnedFd>,
	kind: SockKind,
	family: Option<Family>,
	local: Option<SockAddr>,
	remote: Option<SockAddr>,
	bound: bool,
	connected: bool,
	accepted: bool,
}

impl Socket {
	/// Creates a fresh socket for `family`.
	///
	/// The descriptor is created with `SOCK_NONBLOCK | SOCK_CLOEXEC`.
	pub fn new(family: Family, kind: SockKind) -> std::io::Result<Self> {
		let mut socket = Self::closed(kind);
		socket.open(family)?;
		Ok(socket)
	}

	/// A socket with no descriptor yet. `open` creates one.
	pub fn closed(kind: SockKind) -> Self {
		Self {
			fd: None,
			kind,
			family: None,
			local: None,
			remote: None,
			bound: false,
			connected: false,
			accepted: false,
		}
	}

	/// Creates a fresh socket bound to `addr`.
	pub fn from_addr(addr: &SockAddr, kind: SockKind) -> std::io::Result<Self> {
		let mut socket = Self::new(addr.family(), kind)?;
		socket.bind(addr)?;
		Ok(socket)
	}

	/// Adopts an existing descriptor.
	///
	/// Forces non-blocking and close-on-exec, then asks the kernel for the
	/// socket type and addresses.
	pub fn from_fd(fd: OwnedFd) -> std::io::Result<Self> {
		let raw = fd.as_raw_fd();
		options::set_nonblocking_cloexec(raw)?;

		let kind = SockKind::from_raw(options::socket_type(&fd)?)
			.ok_or(SocketError::InvalidState("unsupported socket type"))?;
		let local = sockname(raw, false);
		let remote = sockname(raw, true);
		let family = match &local {
			Some(addr) => Some(addr.family()),
			None => sock_domain(raw),
		};

		Ok(Self {
			fd: Some(fd),
			kind,
			family,
			connected: remote.is_some(),
			local,
			remote,
			bound: false,
			accepted: false,
		})
	}

	/// (Re)creates the descriptor for `family`.
	///
	/// Any previous descriptor is closed first and the recorded addresses
	/// are forgotten; the kind is kept.
	pub fn open(&mut self, family: Family) -> std::io::Result<()> {
		self.close();
		let fd = unsafe {
			libc::socket(family.raw(), self.kind.raw() | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, 0)
		};
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() }.into());
		}
		self.fd = Some(unsafe { OwnedFd::from_raw_fd(fd) });
		self.family = Some(family);
		self.local = None;
		self.remote = None;
		self.accepted = false;
		trace!("socket fd={} opened ({}, {:?})", fd, family.name(), self.kind);
		Ok(())
	}

	/// Raw descriptor, or -1 when closed.
	#[inline]
	pub fn fd(&self) -> RawFd {
		self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
	}

	#[inline]
	pub fn is_open(&self) -> bool {
		self.fd.is_some()
	}

	pub fn kind(&self) -> SockKind {
		self.kind
	}

	pub fn family(&self) -> Option<Family> {
		self.family
	}

	pub fn local_addr(&self) -> Option<&SockAddr> {
		self.local.as_ref()
	}

	pub fn peer_addr(&self) -> Option<&SockAddr> {
		self.remote.as_ref()
	}

	pub fn is_bound(&self) -> bool {
		self.bound
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	/// True for sockets produced by [`Socket::accept`].
	pub fn is_accepted(&self) -> bool {
		self.accepted
	}

	fn check_family(&self, addr: &SockAddr) -> std::io::Result<()> {
		let family = self.family.ok_or(SocketError::NotOpen)?;
		if addr.family() != family {
			return Err(SocketError::FamilyMismatch {
				socket: family.name(),
				addr: addr.family().name(),
			}
			.into());
		}
		if let Some(remote) = &self.remote {
			if remote.family() != addr.family() {
				return Err(SocketError::FamilyMismatch {
					socket: remote.family().name(),
					addr: addr.family().name(),
				}
				.into());
			}
		}
		Ok(())
	}

	/// Binds to `addr`.
	pub fn bind(&mut self, addr: &SockAddr) -> std::io::Result<()> {
		let fd = self.fd();
		if fd == -1 {
			return Err(SocketError::NotOpen.into());
		}
		self.check_family(addr)?;

		let result = addr.with_raw(|ptr, len| unsafe { libc::bind(fd, ptr, len) });
		match result {
			Some(-1) => Err(SocketError::Bind {
				errno: errno(),
				addr: addr.to_string(),
			}
			.into()),
			Some(_) => {
				self.bound = true;
				self.local = sockname(fd, false).or_else(|| Some(addr.clone()));
				Ok(())
			}
			None => Err(SocketError::InvalidAddress { reason: "address too long" }.into()),
		}
	}

	/// Binds to `addr` and starts listening.
	///
	/// Sets SO_REUSEADDR first. `backlog` defaults to SOMAXCONN. The local
	/// address afterwards is whatever the kernel assigned, so port 0
	/// resolves to the real ephemeral port.
	pub fn listen(&mut self, addr: &SockAddr, backlog: Option<i32>) -> std::io::Result<()> {
		if !self.is_open() {
			return Err(SocketError::NotOpen.into());
		}
		if addr.family() != Family::Unix {
			set_reuse_addr(&*self, true)?;
		}
		self.bind(addr)?;

		let backlog = backlog.unwrap_or(libc::SOMAXCONN);
		if unsafe { libc::listen(self.fd(), backlog) } == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog }.into());
		}
		Ok(())
	}

	/// Accepts one queued connection.
	///
	/// `Err(Status::NotReady)` when the queue is empty. EINTR and
	/// ECONNABORTED are retried. The accepted socket inherits this
	/// socket's family and kind and knows its peer.
	pub fn accept(&self) -> Result<Socket, Status> {
		let fd = self.fd();
		if fd == -1 {
			return Err(Status::None);
		}
		loop {
			let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
			let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

			let new_fd = unsafe {
				libc::accept4(
					fd,
					&mut storage as *mut _ as *mut libc::sockaddr,
					&mut len,
					libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
				)
			};

			if new_fd == -1 {
				match errno() {
					libc::EINTR | libc::ECONNABORTED => continue,
					e => return Err(Status::from_errno(e)),
				}
			}

			let owned = unsafe { OwnedFd::from_raw_fd(new_fd) };
			let remote = unsafe { SockAddr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len) };
			return Ok(Socket {
				fd: Some(owned),
				kind: self.kind,
				family: self.family,
				local: sockname(new_fd, false),
				remote,
				bound: false,
				connected: true,
				accepted: true,
			});
		}
	}

	/// Starts a non-blocking connect.
	///
	/// `Ok(0)` when the kernel completed it at once (loopback, datagram),
	/// `InProgress` when the caller has to wait for writability and then
	/// check [`Socket::take_error`]. An address of the wrong family gives
	/// `Error(EAFNOSUPPORT)` without touching the descriptor.
	pub fn connect(&mut self, addr: &SockAddr) -> Status {
		let fd = self.fd();
		if fd == -1 {
			return Status::None;
		}
		if self.family != Some(addr.family()) {
			return Status::Error(libc::EAFNOSUPPORT);
		}

		let result = addr.with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) });
		let status = match result {
			None => return Status::Error(libc::EINVAL),
			Some(0) => {
				self.connected = true;
				Status::Ok(0)
			}
			Some(_) => match errno() {
				libc::EINPROGRESS | libc::EINTR => Status::InProgress,
				e => return Status::Error(e),
			},
		};

		self.remote = Some(addr.clone());
		if let Some(local) = sockname(fd, false) {
			self.local = Some(local);
		}
		status
	}

	/// Records that a pending connect has been verified.
	pub(crate) fn mark_connected(&mut self) {
		self.connected = true;
		if let Some(local) = sockname(self.fd(), false) {
			self.local = Some(local);
		}
	}

	/// Reads and clears the socket error status.
	///
	/// Returns `None` if no error (connect succeeded).
	/// Returns `Some(error)` if connect failed.
	///
	/// Call this after the reactor signals the socket is writable.
	/// Reading clears the error, so only call once.
	pub fn take_error(&self) -> std::io::Result<Option<std::io::Error>> {
		match socket_error(self)? {
			0 => Ok(None),
			error => Ok(Some(std::io::Error::from_raw_os_error(error))),
		}
	}

	/// Closes the descriptor. A second call does nothing.
	pub fn close(&mut self) {
		if let Some(fd) = self.fd.take() {
			trace!("socket fd={} closed", fd.as_raw_fd());
			drop(fd);
		}
		self.bound = false;
		self.connected = false;
	}
}

impl AsRawFd for Socket {
	fn as_raw_fd(&self) -> RawFd {
		self.fd()
	}
}

/// getsockname / getpeername through sockaddr_storage.
fn sockname(fd: RawFd, peer: bool) -> Option<SockAddr> {
	if fd == -1 {
		return None;
	}
	let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
	let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
	let ptr = &mut storage as *mut _ as *mut libc::sockaddr;

	let result = unsafe {
		if peer {
			libc::getpeername(fd, ptr, &mut len)
		} else {
			libc::getsockname(fd, ptr, &mut len)
		}
	};
	if result == -1 {
		return None;
	}
	unsafe { SockAddr::from_sockaddr(ptr, len) }
}

/// Family from SO_DOMAIN, for descriptors whose name is unreadable.
fn sock_domain(fd: RawFd) -> Option<Family> {
	let mut domain: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			fd,
			libc::SOL_SOCKET,
			libc::SO_DOMAIN,
			&mut domain as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 { None } else { Family::from_raw(domain) }
}

/*
Why no Drop impl? OwnedFd closes on drop, and `close` just takes it out
of the Option. Dropping a Socket closes whatever it still holds, closing
it twice is impossible by construction.
*/
