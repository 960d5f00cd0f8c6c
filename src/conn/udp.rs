use std::rc::Rc;
use log::{debug, warn};
use crate::addr::SockAddr;
use crate::config::{BufferConfig, ConnectionConfig, ReuseConfig};
use crate::error::Status;
use crate::reactor::Reactor;
use crate::socket::{SockKind, Socket};
use super::{Connection, Endpoint, Lifecycle};

/// A datagram socket bound to a local address, driven like any connection.
///
/// `read_from` tells who sent each datagram, `write_to` addresses each
/// reply. Timeouts and readiness follow the usual read/write protocol.
pub struct UdpServer {
	conn: Connection<Socket>,
	addr: SockAddr,
	reuse: ReuseConfig,
	buffers: BufferConfig,
}

impl UdpServer {
	pub fn new(reactor: Rc<dyn Reactor>, addr: SockAddr, config: ConnectionConfig) -> Self {
		Self {
			conn: Connection::with_config(reactor, Socket::closed(SockKind::Datagram), config),
			addr,
			reuse: ReuseConfig { addr: false, port: false },
			buffers: BufferConfig::default(),
		}
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	pub fn connection(&self) -> &Connection<Socket> {
		&self.conn
	}

	/// Bound address (ephemeral port resolved) once started.
	pub fn local_addr(&self) -> Option<SockAddr> {
		self.conn.local_addr()
	}

	/// Binds the socket and starts watching it.
	pub fn start(&self) -> std::io::Result<()> {
		self.conn.begin()?;
		let bound = self.conn.with_transport(|socket| -> std::io::Result<()> {
			socket.open(self.addr.family())?;
			self.reuse.apply(&*socket)?;
			self.buffers.apply(&*socket)?;
			socket.bind(&self.addr)
		});
		if let Err(e) = bound.and_then(|()| self.conn.start()) {
			warn!("udp server on {} failed: {}", self.addr, e);
			self.conn.abandon();
			return Err(e);
		}
		debug!("udp server bound to {:?}", self.local_addr());
		Ok(())
	}

	/// Receives one datagram and its sender.
	pub fn read_from(&self, buf: &mut [u8]) -> (Status, Option<SockAddr>) {
		if self.conn.state() != Lifecycle::Open {
			return (Status::None, None);
		}
		let (status, from) = self.conn.with_transport(|socket| socket.recv_from(buf));
		(self.conn.finish_read(status), from)
	}

	/// Sends one datagram to `addr`.
	pub fn write_to(&self, buf: &[u8], addr: &SockAddr) -> Status {
		if self.conn.state() != Lifecycle::Open {
			return Status::None;
		}
		let status = self.conn.with_transport(|socket| socket.send_to(buf, addr));
		self.conn.finish_write(status)
	}

	pub fn cleanup(&self) {
		self.conn.cleanup();
	}

	pub fn delete(self) {
		self.conn.cleanup();
	}
}

impl Endpoint for UdpServer {
	fn start(&self) -> std::io::Result<()> {
		UdpServer::start(self)
	}

	fn read(&self, buf: &mut [u8]) -> Status {
		self.read_from(buf).0
	}

	/// Unaddressed writes need a connected peer; a bound server has none.
	fn write(&self, buf: &[u8]) -> Status {
		self.conn.write(buf)
	}

	fn close(&self) {
		self.conn.close()
	}
}
