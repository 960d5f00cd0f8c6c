use crate::addr::{SockAddr, ToSockAddr};
use crate::error::{Status, errno};
use super::{SockKind, Socket};

/// Runs a syscall, retrying while it is interrupted.
fn retry<F: FnMut() -> isize>(mut op: F) -> Result<usize, i32> {
	loop {
		let n = op();
		if n >= 0 {
			return Ok(n as usize);
		}
		match errno() {
			libc::EINTR => continue,
			e => return Err(e),
		}
	}
}

impl Socket {
	/// Maps a finished receive onto a status.
	///
	/// Zero bytes on a stream is the peer's orderly shutdown; a datagram
	/// can legitimately be empty.
	fn received(&self, result: Result<usize, i32>) -> Status {
		match result {
			Ok(0) if self.kind == SockKind::Stream => Status::Close,
			Ok(n) => Status::Ok(n),
			Err(e) => Status::from_errno(e),
		}
	}

	fn sent(result: Result<usize, i32>) -> Status {
		match result {
			Ok(n) => Status::Ok(n),
			Err(e) => Status::from_errno(e),
		}
	}

	/// Reads into `buf`.
	///
	/// `None` for an empty buffer or a closed socket; `Close` when a stream
	/// peer shut down.
	pub fn read(&mut self, buf: &mut [u8]) -> Status {
		let fd = self.fd();
		if fd == -1 || buf.is_empty() {
			return Status::None;
		}
		let result = retry(|| unsafe {
			match self.kind {
				SockKind::Stream => libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()),
				SockKind::Datagram => libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0),
			}
		});
		self.received(result)
	}

	/// Writes `buf`. A vanished peer surfaces as `Error(EPIPE)`, never SIGPIPE.
	pub fn write(&mut self, buf: &[u8]) -> Status {
		self.send(buf, 0)
	}

	/// send(2) with extra flags; MSG_NOSIGNAL is always added.
	pub fn send(&mut self, buf: &[u8], flags: i32) -> Status {
		let fd = self.fd();
		if fd == -1 || buf.is_empty() {
			return Status::None;
		}
		Self::sent(retry(|| unsafe {
			libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), flags | libc::MSG_NOSIGNAL)
		}))
	}

	/// recv(2) with flags (MSG_PEEK and friends).
	pub fn recv(&mut self, buf: &mut [u8], flags: i32) -> Status {
		let fd = self.fd();
		if fd == -1 || buf.is_empty() {
			return Status::None;
		}
		let result = retry(|| unsafe {
			libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags)
		});
		self.received(result)
	}

	/// Sends one datagram to `addr`.
	pub fn send_to(&mut self, buf: &[u8], addr: &SockAddr) -> Status {
		let fd = self.fd();
		if fd == -1 || buf.is_empty() {
			return Status::None;
		}
		if self.family() != Some(addr.family()) {
			return Status::Error(libc::EAFNOSUPPORT);
		}

		let result = addr.with_raw(|ptr, len| {
			retry(|| unsafe {
				libc::sendto(
					fd,
					buf.as_ptr() as *const libc::c_void,
					buf.len(),
					libc::MSG_NOSIGNAL,
					ptr,
					len,
				)
			})
		});
		match result {
			Some(result) => Self::sent(result),
			None => Status::Error(libc::EINVAL),
		}
	}

	/// Receives one datagram and reports who sent it.
	///
	/// The sender is `None` when the kernel did not supply an address
	/// (connected stream sockets).
	pub fn recv_from(&mut self, buf: &mut [u8]) -> (Status, Option<SockAddr>) {
		let fd = self.fd();
		if fd == -1 || buf.is_empty() {
			return (Status::None, None);
		}

		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
		let result = retry(|| unsafe {
			libc::recvfrom(
				fd,
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
				0,
				&mut storage as *mut _ as *mut libc::sockaddr,
				&mut len,
			)
		});

		let status = self.received(result);
		let from = match status {
			Status::Ok(_) => unsafe { SockAddr::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len) },
			_ => None,
		};
		(status, from)
	}
}

/*
 ---
  ┌────────────────────────────┬────────────────┐
  │          Syscall           │     Status     │
  ├────────────────────────────┼────────────────┤
  │ n > 0                      │ Ok(n)          │
  ├────────────────────────────┼────────────────┤
  │ 0 on a stream              │ Close          │
  ├────────────────────────────┼────────────────┤
  │ 0 on a datagram            │ Ok(0)          │
  ├────────────────────────────┼────────────────┤
  │ EAGAIN / EWOULDBLOCK       │ NotReady       │
  ├────────────────────────────┼────────────────┤
  │ EINTR                      │ retried        │
  ├────────────────────────────┼────────────────┤
  │ anything else              │ Error(errno)   │
  └────────────────────────────┴────────────────┘
 ---
*/
