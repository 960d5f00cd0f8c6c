use crate::addr::ToSockAddr;

/// Link-layer (`AF_PACKET`) address: interface + ethertype.
///
/// The hardware address is optional; it is only needed when sending on a
/// `SOCK_DGRAM` packet socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddr {
	ifindex: i32,
	/// Ethertype in host order (e.g. 0x0800 for IPv4).
	protocol: u16,
	hw: [u8; 8],
	hw_len: u8,
}

impl LinkAddr {
	pub fn new(ifindex: i32, protocol: u16) -> Self {
		Self { ifindex, protocol, hw: [0; 8], hw_len: 0 }
	}

	/// Attaches a hardware address; anything past 8 bytes is dropped.
	pub fn with_hw(mut self, hw: &[u8]) -> Self {
		let n = hw.len().min(self.hw.len());
		self.hw = [0; 8];
		self.hw[..n].copy_from_slice(&hw[..n]);
		self.hw_len = n as u8;
		self
	}

	pub fn ifindex(&self) -> i32 {
		self.ifindex
	}

	pub fn protocol(&self) -> u16 {
		self.protocol
	}

	pub fn hw(&self) -> &[u8] {
		&self.hw[..self.hw_len as usize]
	}

	pub(crate) fn to_raw(&self) -> libc::sockaddr_ll {
		let mut raw: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
		raw.sll_family = libc::AF_PACKET as libc::c_ushort;
		raw.sll_protocol = self.protocol.to_be();
		raw.sll_ifindex = self.ifindex;
		raw.sll_halen = self.hw_len;
		raw.sll_addr = self.hw;
		raw
	}

	pub(crate) fn from_raw(raw: &libc::sockaddr_ll) -> Self {
		let hw_len = raw.sll_halen.min(8);
		let mut hw = [0u8; 8];
		hw[..hw_len as usize].copy_from_slice(&raw.sll_addr[..hw_len as usize]);
		Self {
			ifindex: raw.sll_ifindex,
			protocol: u16::from_be(raw.sll_protocol),
			hw,
			hw_len,
		}
	}
}

impl ToSockAddr for LinkAddr {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}
