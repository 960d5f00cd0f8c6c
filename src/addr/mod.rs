//! Address families and related types.
//!
//! This module defines the four address families supported:
//! - `Ipv4`: Internet Protocol version 4
//! - `Ipv6`: Internet Protocol version 6
//! - `Unix`: Unix domain sockets (filesystem path or abstract name)
//! - `Link`: link-layer (`AF_PACKET`) endpoints
//!
//! `SockAddr` is the tagged union over all of them. The tag fixes which
//! raw `sockaddr_*` layout and length is handed to the kernel.

mod ipv4;
mod ipv6;
mod link;
mod unix;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::link::LinkAddr;
pub use self::unix::UnixAddr;

use std::fmt;
use std::str::FromStr;
use crate::error::SocketError;

/// Address family of a socket or address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	Unix,
	Ipv4,
	Ipv6,
	Link,
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Unix => libc::AF_UNIX,
			Family::Ipv4 => libc::AF_INET,
			Family::Ipv6 => libc::AF_INET6,
			Family::Link => libc::AF_PACKET,
		}
	}

	pub fn from_raw(raw: libc::c_int) -> Option<Self> {
		match raw {
			libc::AF_UNIX => Some(Family::Unix),
			libc::AF_INET => Some(Family::Ipv4),
			libc::AF_INET6 => Some(Family::Ipv6),
			libc::AF_PACKET => Some(Family::Link),
			_ => None,
		}
	}

	pub fn name(self) -> &'static str {
		match self {
			Family::Unix => "unix",
			Family::Ipv4 => "ipv4",
			Family::Ipv6 => "ipv6",
			Family::Link => "link",
		}
	}
}

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub(crate) trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address is invalid (e.g., path too long for Unix).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub(crate) trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes of the correct family.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for UnixAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_un) };
		Some(Self::from_raw(raw, len))
	}
}

impl FromSockAddr for LinkAddr {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_ll) };
		Some(Self::from_raw(raw))
	}
}

/// A socket address of any supported family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SockAddr {
	Unix(UnixAddr),
	V4(SocketAddrV4),
	V6(SocketAddrV6),
	Link(LinkAddr),
}

impl SockAddr {
	/// IPv4 from dotted-quad text and a port.
	pub fn ipv4(host: &str, port: u16) -> Result<Self, SocketError> {
		SocketAddrV4::parse(host, port).map(SockAddr::V4)
	}

	/// IPv6 from its textual form and a port.
	pub fn ipv6(host: &str, port: u16) -> Result<Self, SocketError> {
		SocketAddrV6::parse(host, port).map(SockAddr::V6)
	}

	/// Filesystem Unix path; fails when it does not fit `sun_path`.
	pub fn unix<P: AsRef<[u8]>>(path: P) -> Result<Self, SocketError> {
		UnixAddr::checked(UnixAddr::new(path)).map(SockAddr::Unix)
	}

	/// Abstract Unix name (Linux only, no filesystem entry).
	pub fn unix_abstract<P: AsRef<[u8]>>(name: P) -> Result<Self, SocketError> {
		UnixAddr::checked(UnixAddr::abstract_socket(name)).map(SockAddr::Unix)
	}

	/// Link-layer endpoint on an interface for an ethertype.
	pub fn link(ifindex: i32, protocol: u16) -> Self {
		SockAddr::Link(LinkAddr::new(ifindex, protocol))
	}

	/// Builds an address of `family` from host text and port.
	///
	/// For `Unix` the host is the path (a leading `@` selects an abstract
	/// name) and the port is ignored. `Link` has no textual host form.
	pub fn from_text(family: Family, host: &str, port: u16) -> Result<Self, SocketError> {
		match family {
			Family::Ipv4 => Self::ipv4(host, port),
			Family::Ipv6 => Self::ipv6(host, port),
			Family::Unix => match host.strip_prefix('@') {
				Some(name) => Self::unix_abstract(name),
				None => Self::unix(host),
			},
			Family::Link => Err(SocketError::InvalidAddress { reason: "link addresses have no host text" }),
		}
	}

	pub fn family(&self) -> Family {
		match self {
			SockAddr::Unix(_) => Family::Unix,
			SockAddr::V4(_) => Family::Ipv4,
			SockAddr::V6(_) => Family::Ipv6,
			SockAddr::Link(_) => Family::Link,
		}
	}

	/// Port for the IP families.
	pub fn port(&self) -> Option<u16> {
		match self {
			SockAddr::V4(a) => Some(a.port()),
			SockAddr::V6(a) => Some(a.port()),
			_ => None,
		}
	}

	/// Textual host part: IP text, Unix path (`@name` when abstract) or interface index.
	pub fn host(&self) -> String {
		match self {
			SockAddr::V4(a) => std::net::Ipv4Addr::from(a.ip()).to_string(),
			SockAddr::V6(a) => std::net::Ipv6Addr::from(a.ip()).to_string(),
			SockAddr::Unix(a) if a.is_abstract() => format!("@{}", String::from_utf8_lossy(a.path())),
			SockAddr::Unix(a) => String::from_utf8_lossy(a.path()).into_owned(),
			SockAddr::Link(a) => a.ifindex().to_string(),
		}
	}

	/// Decodes kernel-filled storage by its `sa_family` tag.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes.
	pub(crate) unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if (len as usize) < std::mem::size_of::<libc::sa_family_t>() {
			return None;
		}
		let family = unsafe { (*addr).sa_family } as libc::c_int;
		unsafe {
			match Family::from_raw(family)? {
				Family::Ipv4 => SocketAddrV4::from_sockaddr(addr, len).map(SockAddr::V4),
				Family::Ipv6 => SocketAddrV6::from_sockaddr(addr, len).map(SockAddr::V6),
				Family::Unix => UnixAddr::from_sockaddr(addr, len).map(SockAddr::Unix),
				Family::Link => LinkAddr::from_sockaddr(addr, len).map(SockAddr::Link),
			}
		}
	}
}

impl ToSockAddr for SockAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match self {
			SockAddr::Unix(a) => a.with_raw(f),
			SockAddr::V4(a) => a.with_raw(f),
			SockAddr::V6(a) => a.with_raw(f),
			SockAddr::Link(a) => a.with_raw(f),
		}
	}
}

impl fmt::Display for SockAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SockAddr::V4(a) => fmt::Display::fmt(a, f),
			SockAddr::V6(a) => fmt::Display::fmt(a, f),
			SockAddr::Unix(_) => f.write_str(&self.host()),
			SockAddr::Link(a) => write!(f, "link:{}/{}", a.ifindex(), a.protocol()),
		}
	}
}

impl FromStr for SockAddr {
	type Err = SocketError;

	/// Parses the forms produced by `Display`:
	/// `1.2.3.4:80`, `[::1]:80`, `/path`, `./path`, `@abstract`, `link:2/2048`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if let Some(rest) = s.strip_prefix("link:") {
			let (index, proto) = rest
				.split_once('/')
				.ok_or(SocketError::InvalidAddress { reason: "expected link:<ifindex>/<protocol>" })?;
			let index = index.parse().map_err(|_| SocketError::InvalidAddress { reason: "bad interface index" })?;
			let proto = proto.parse().map_err(|_| SocketError::InvalidAddress { reason: "bad link protocol" })?;
			return Ok(SockAddr::link(index, proto));
		}
		if let Some(name) = s.strip_prefix('@') {
			return SockAddr::unix_abstract(name);
		}
		if s.starts_with('/') || s.starts_with('.') {
			return SockAddr::unix(s);
		}
		match s.parse::<std::net::SocketAddr>() {
			Ok(std::net::SocketAddr::V4(a)) => Ok(SockAddr::V4(a.into())),
			Ok(std::net::SocketAddr::V6(a)) => Ok(SockAddr::V6(a.into())),
			Err(_) => Err(SocketError::InvalidAddress { reason: "unparsable socket address" }),
		}
	}
}

impl From<SocketAddrV4> for SockAddr {
	fn from(addr: SocketAddrV4) -> Self {
		SockAddr::V4(addr)
	}
}

impl From<SocketAddrV6> for SockAddr {
	fn from(addr: SocketAddrV6) -> Self {
		SockAddr::V6(addr)
	}
}

impl From<std::net::SocketAddr> for SockAddr {
	fn from(addr: std::net::SocketAddr) -> Self {
		match addr {
			std::net::SocketAddr::V4(a) => SockAddr::V4(a.into()),
			std::net::SocketAddr::V6(a) => SockAddr::V6(a.into()),
		}
	}
}
