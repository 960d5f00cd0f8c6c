use crate::addr::ToSockAddr;
use crate::error::SocketError;

/// Unix domain socket address (file path or abstract).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnixAddr {
	path: Vec<u8>,
	/// True if this is an abstract socket (Linux-only, no filesystem entry).
	is_abstract: bool,
}

/// Offset of `sun_path` inside `sockaddr_un`.
const PATH_OFFSET: usize = std::mem::offset_of!(libc::sockaddr_un, sun_path);

impl UnixAddr {
	/// Creates a new Unix address from a filesystem path.
	///
	/// Not validated; `SockAddr::unix` rejects paths that do not fit.
	pub fn new<P: AsRef<[u8]>>(path: P) -> Self {
		Self {
			path: path.as_ref().to_vec(),
			is_abstract: false,
		}
	}

	/// Creates an abstract socket address (Linux-only).
	///
	/// Abstract sockets exist only in memory, with no filesystem entry.
	/// Name can contain any bytes (no null-terminator needed).
	pub fn abstract_socket<P: AsRef<[u8]>>(name: P) -> Self {
		Self {
			path: name.as_ref().to_vec(),
			is_abstract: true,
		}
	}

	/// Rejects addresses the kernel could not take.
	pub(crate) fn checked(addr: Self) -> Result<Self, SocketError> {
		if !addr.is_abstract && addr.path.contains(&0) {
			return Err(SocketError::InvalidAddress { reason: "unix path contains NUL" });
		}
		match addr.to_raw() {
			Some(_) => Ok(addr),
			None => Err(SocketError::InvalidAddress { reason: "unix path too long" }),
		}
	}

	/// Returns true if this is an abstract socket.
	pub fn is_abstract(&self) -> bool {
		self.is_abstract
	}

	/// Returns the path bytes.
	pub fn path(&self) -> &[u8] {
		&self.path
	}

	/// Length the kernel expects for this address.
	fn raw_len(&self) -> usize {
		// Abstract: leading NUL + name. Filesystem: path + terminating NUL.
		PATH_OFFSET + self.path.len() + 1
	}

	/// Converts to the raw sockaddr_un for syscalls.
	pub(crate) fn to_raw(&self) -> Option<libc::sockaddr_un> {
		let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
		addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

		// One byte is always reserved: the leading NUL or the terminator.
		if self.path.len() + 1 > addr.sun_path.len() {
			return None;
		}
		let start = if self.is_abstract { 1 } else { 0 };
		for (i, &byte) in self.path.iter().enumerate() {
			addr.sun_path[start + i] = byte as libc::c_char;
		}

		Some(addr)
	}

	/// Creates from raw sockaddr_un, honouring the kernel-reported length.
	pub(crate) fn from_raw(raw: &libc::sockaddr_un, len: libc::socklen_t) -> Self {
		let avail = (len as usize).saturating_sub(PATH_OFFSET).min(raw.sun_path.len());
		let bytes: Vec<u8> = raw.sun_path[..avail].iter().map(|&c| c as u8).collect();

		match bytes.split_first() {
			// Unnamed socket (e.g. client side of a socketpair).
			None => Self { path: Vec::new(), is_abstract: false },
			Some((&0, name)) => Self { path: name.to_vec(), is_abstract: true },
			Some(_) => {
				let end = bytes.iter().position(|&c| c == 0).unwrap_or(bytes.len());
				Self { path: bytes[..end].to_vec(), is_abstract: false }
			}
		}
	}
}

/*
Why Option? Unix socket paths have a maximum length
(typically 108 bytes, with one reserved for null terminator).
If the path is too long, we return None rather than silently
truncating or causing undefined behavior.

Abstract names are length-delimited, not NUL-terminated, so the exact
length matters: passing sizeof(sockaddr_un) would make the trailing
zero padding part of the name.
*/

impl ToSockAddr for UnixAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw()?;  // Returns None if path too long
		let ptr = &raw as *const _ as *const libc::sockaddr;
		Some(f(ptr, self.raw_len() as libc::socklen_t))
	}
}
