//! Connection lifecycle on top of a [`Reactor`](crate::reactor::Reactor).
//!
//! A [`Connection`] owns one transport plus the watcher and timers that
//! drive it. [`Client`], [`Server`]/[`Acceptor`] and [`UdpServer`] are
//! built around a connection and add connect, accept or datagram
//! addressing. Everything is generic over a [`Transport`] so the same
//! machinery runs over a plain [`Socket`] or an encrypted session.

mod acceptor;
mod client;
mod connection;
mod udp;

pub use self::acceptor::{Acceptor, Server};
pub use self::client::{Client, Phase};
pub use self::connection::Connection;
pub use self::udp::UdpServer;

use crate::error::Status;
use crate::socket::Socket;

/// Where an object is in its life.
///
/// ```text
/// Created → Starting → Open → Closing → Closed → Freed
///                        ↑                 │
///                        └─────────────────┘  (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
	Created,
	Starting,
	Open,
	Closing,
	Closed,
	Freed,
}

/// Which end of a connection a transport is set up for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
	Client,
	Server,
}

/// Byte transport a [`Connection`] drives.
///
/// The transport owns the socket. `establish` runs once the socket is
/// connected (client) or accepted (server), before the connection starts
/// watching it; `shutdown` runs right before the socket is closed.
pub trait Transport: 'static {
	fn socket(&self) -> &Socket;

	fn socket_mut(&mut self) -> &mut Socket;

	fn read(&mut self, buf: &mut [u8]) -> Status;

	fn write(&mut self, buf: &[u8]) -> Status;

	fn establish(&mut self, _role: Role) -> std::io::Result<()> {
		Ok(())
	}

	fn shutdown(&mut self) {}
}

impl Transport for Socket {
	fn socket(&self) -> &Socket {
		self
	}

	fn socket_mut(&mut self) -> &mut Socket {
		self
	}

	fn read(&mut self, buf: &mut [u8]) -> Status {
		Socket::read(self, buf)
	}

	fn write(&mut self, buf: &[u8]) -> Status {
		Socket::write(self, buf)
	}
}

/// The operations every connection-like object shares.
pub trait Endpoint {
	fn start(&self) -> std::io::Result<()>;

	fn read(&self, buf: &mut [u8]) -> Status;

	fn write(&self, buf: &[u8]) -> Status;

	fn close(&self);
}
