use std::fmt;
use crate::addr::ToSockAddr;
use crate::error::SocketError;

/// IPv6 socket address (IP + port + scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV6 {
	ip: [u8; 16],
	port: u16,
	/// Scope ID for link-local addresses (identifies network interface).
	/// Usually 0 unless using link-local addresses like fe80::.
	scope_id: u32,
}

impl SocketAddrV6 {
	/// Creates a new IPv6 address.
	pub fn new(ip: [u8; 16], port: u16) -> Self {
		Self { ip, port, scope_id: 0 }
	}

	/// Creates with explicit scope ID.
	///
	/// Use for link-local addresses (fe80::) where you need to specify the interface.
	pub fn with_scope(ip: [u8; 16], port: u16, scope_id: u32) -> Self {
		Self { ip, port, scope_id }
	}

	/// Parses IPv6 text (`::1`, `fe80::1`); brackets are accepted.
	pub fn parse(host: &str, port: u16) -> Result<Self, SocketError> {
		let host = host.trim_start_matches('[').trim_end_matches(']');
		let ip: std::net::Ipv6Addr = host
			.parse()
			.map_err(|_| SocketError::InvalidAddress { reason: "invalid IPv6 address" })?;
		Ok(Self::new(ip.octets(), port))
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 16] {
		self.ip
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Returns the scope ID.
	pub fn scope_id(&self) -> u32 {
		self.scope_id
	}

	/// Converts to the raw sockaddr_in6 for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in6 {
		libc::sockaddr_in6 {
			sin6_family: libc::AF_INET6 as libc::sa_family_t,
			sin6_port: self.port.to_be(),
			sin6_flowinfo: 0,
			sin6_addr: libc::in6_addr {
				s6_addr: self.ip,
			},
			sin6_scope_id: self.scope_id,
		}
	}

	/// Creates from raw sockaddr_in6.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in6) -> Self {
		Self {
			ip: raw.sin6_addr.s6_addr,
			port: u16::from_be(raw.sin6_port),
			scope_id: raw.sin6_scope_id,
		}
	}
}

impl ToSockAddr for SocketAddrV6 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

impl fmt::Display for SocketAddrV6 {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&std::net::SocketAddrV6::new(self.ip.into(), self.port, 0, self.scope_id), f)
	}
}

impl From<std::net::SocketAddrV6> for SocketAddrV6 {
	fn from(addr: std::net::SocketAddrV6) -> Self {
		Self::with_scope(addr.ip().octets(), addr.port(), addr.scope_id())
	}
}
