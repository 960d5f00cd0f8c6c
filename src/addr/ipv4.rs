use std::fmt;
use crate::addr::ToSockAddr;
use crate::error::SocketError;

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// Parses dotted-quad text, e.g. `SocketAddrV4::parse("127.0.0.1", 10000)`.
	pub fn parse(host: &str, port: u16) -> Result<Self, SocketError> {
		let ip: std::net::Ipv4Addr = host
			.parse()
			.map_err(|_| SocketError::InvalidAddress { reason: "invalid IPv4 address" })?;
		Ok(Self::new(ip.octets(), port))
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_ne_bytes(self.ip),
			},
			sin_zero: [0; 8],
		}
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();  // sockaddr_in lives on THIS stack frame
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&std::net::SocketAddrV4::new(self.ip.into(), self.port), f)
	}
}

impl From<std::net::SocketAddrV4> for SocketAddrV4 {
	fn from(addr: std::net::SocketAddrV4) -> Self {
		Self::new(addr.ip().octets(), addr.port())
	}
}

/*
s_addr holds the four octets in network order, which is exactly their
in-memory order. from_ne_bytes/to_ne_bytes keep the bytes where they are.
 */
