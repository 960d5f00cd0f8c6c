use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use log::{debug, trace, warn};
use crate::addr::{Family, SockAddr};
use crate::config::ClientConfig;
use crate::error::{ErrorKind, SocketError, Status};
use crate::reactor::{Reactor, Ready, TimerId, WatcherId};
use crate::socket::{SockKind, Socket};
use super::{Connection, Endpoint, Lifecycle, Role, Transport};

/// Connect progress of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
	Disconnected,
	Connecting,
	Connected,
}

/// Why an attempt failed, which decides how it is unwound.
enum Failure {
	/// Before the connect syscall: socket creation, options, bind.
	Setup(std::io::Error),
	/// The connect itself or promotion afterwards.
	Connect(std::io::Error),
}

struct ClientShared<T: Transport> {
	conn: Connection<T>,
	remote: SockAddr,
	config: ClientConfig,
	phase: Cell<Phase>,
	reconnect: Cell<bool>,
	/// Set while `start` unwinds a failed first attempt.
	suppress: Cell<bool>,
	connect_watcher: Cell<Option<WatcherId>>,
	connect_timer: Cell<Option<TimerId>>,
	reconnect_timer: Cell<Option<TimerId>>,
	on_connect: RefCell<Option<Box<dyn FnMut(&Client<T>)>>>,
}

/// A connection that dials out, and optionally dials again.
///
/// `start` opens a socket for the remote family and begins a non-blocking
/// connect. Once the connect is verified the client is promoted: the
/// transport is established, the connection starts watching the socket and
/// the connect hook runs.
///
/// With a reconnect interval configured, every close that `stop` did not
/// cause arms exactly one reconnect timer; when it fires the same client
/// connects again on a fresh descriptor.
///
/// # Example
/// ```ignore
/// use std::rc::Rc;
/// use wirelink::{Client, ClientConfig, EventLoop, SockAddr};
///
/// let reactor = Rc::new(EventLoop::new()?);
/// let client = Client::new(reactor.clone(), SockAddr::ipv4("127.0.0.1", 10000)?, ClientConfig::new());
/// client.on_connect(|c| println!("connected to {}", c.remote()));
/// client.connection().on_read(|conn| {
///     let mut buf = [0u8; 2048];
///     while conn.read(&mut buf).is_ok() {}
/// });
/// client.start()?;
/// ```
pub struct Client<T: Transport = Socket>(Rc<ClientShared<T>>);

impl<T: Transport> Clone for Client<T> {
	fn clone(&self) -> Self {
		Client(Rc::clone(&self.0))
	}
}

impl Client<Socket> {
	/// Plain TCP, UDP or Unix client, depending on the address and config.
	pub fn new(reactor: Rc<dyn Reactor>, remote: SockAddr, config: ClientConfig) -> Self {
		let socket = Socket::closed(config.kind);
		Self::with_transport(reactor, remote, config, socket)
	}
}

impl<T: Transport> Client<T> {
	/// Client over a caller-supplied transport. Its socket is (re)opened on
	/// every connect attempt.
	pub fn with_transport(reactor: Rc<dyn Reactor>, remote: SockAddr, config: ClientConfig, transport: T) -> Self {
		let conn = Connection::with_config(reactor, transport, config.connection);
		let shared = Rc::new_cyclic(|weak: &Weak<ClientShared<T>>| {
			let release = weak.clone();
			conn.set_release(move || {
				if let Some(shared) = release.upgrade() {
					Client(shared).stop_connect();
				}
			});
			let teardown = weak.clone();
			conn.set_teardown(move |kind| {
				if let Some(shared) = teardown.upgrade() {
					Client(shared).on_closed(kind);
				}
			});
			ClientShared {
				conn,
				remote,
				config,
				phase: Cell::new(Phase::Disconnected),
				reconnect: Cell::new(false),
				suppress: Cell::new(false),
				connect_watcher: Cell::new(None),
				connect_timer: Cell::new(None),
				reconnect_timer: Cell::new(None),
				on_connect: RefCell::new(None),
			}
		});
		Client(shared)
	}

	/// Called after every successful connect, reconnects included.
	pub fn on_connect<F: FnMut(&Client<T>) + 'static>(&self, hook: F) {
		*self.0.on_connect.borrow_mut() = Some(Box::new(hook));
	}

	/// The connection carrying the data. Set read/write/close hooks here.
	pub fn connection(&self) -> &Connection<T> {
		&self.0.conn
	}

	pub fn remote(&self) -> &SockAddr {
		&self.0.remote
	}

	pub fn phase(&self) -> Phase {
		self.0.phase.get()
	}

	pub fn is_connecting(&self) -> bool {
		self.0.phase.get() == Phase::Connecting
	}

	pub fn is_reconnect_enabled(&self) -> bool {
		self.0.reconnect.get()
	}

	/// True while a reconnect is scheduled.
	pub fn is_reconnect_pending(&self) -> bool {
		self.0.reconnect_timer.get().is_some()
	}

	fn reactor(&self) -> &Rc<dyn Reactor> {
		self.0.conn.reactor()
	}

	/// Starts connecting.
	///
	/// A failure here is returned and unwound completely; no reconnect is
	/// scheduled for it.
	pub fn start(&self) -> std::io::Result<()> {
		if self.0.phase.get() != Phase::Disconnected {
			return Err(SocketError::InvalidState("client already started").into());
		}
		self.0.reconnect.set(self.0.config.reconnect.is_some());
		self.stop_reconnect();

		match self.attempt() {
			Ok(()) => Ok(()),
			Err(Failure::Setup(e)) => {
				self.rollback();
				Err(e)
			}
			Err(Failure::Connect(e)) => {
				warn!("client {} connect failed: {}", self.0.remote, e);
				self.0.suppress.set(true);
				self.0.conn.close_with(Some(ErrorKind::ConnectFailed));
				self.0.suppress.set(false);
				self.0.phase.set(Phase::Disconnected);
				Err(e)
			}
		}
	}

	/// One connect attempt on a fresh descriptor.
	fn attempt(&self) -> Result<(), Failure> {
		self.0.conn.begin().map_err(Failure::Setup)?;
		self.0.phase.set(Phase::Connecting);

		let remote = &self.0.remote;
		let config = &self.0.config;
		self.0
			.conn
			.with_transport(|t| -> std::io::Result<()> {
				let socket = t.socket_mut();
				socket.open(remote.family())?;
				let is_tcp = config.kind == SockKind::Stream && matches!(remote.family(), Family::Ipv4 | Family::Ipv6);
				config.tcp.apply(&*socket, is_tcp)?;
				config.buffers.apply(&*socket)?;
				if let Some(local) = &config.local {
					socket.bind(local)?;
				}
				Ok(())
			})
			.map_err(Failure::Setup)?;

		let status = self.0.conn.with_transport(|t| t.socket_mut().connect(remote));
		debug!("client fd={} connect {}: {}", self.0.conn.fd(), remote, status);
		match status {
			Status::Ok(_) => self.promote().map_err(Failure::Connect),
			Status::InProgress => self.watch_connect().map_err(Failure::Connect),
			Status::Error(e) => Err(Failure::Connect(std::io::Error::from_raw_os_error(e))),
			other => Err(Failure::Connect(std::io::Error::other(format!("connect: {}", other)))),
		}
	}

	/// Waits for the in-flight connect: writability plus a timeout.
	fn watch_connect(&self) -> std::io::Result<()> {
		let weak = Rc::downgrade(&self.0);
		let id = self.reactor().watcher_start(
			self.0.conn.fd(),
			Ready::WRITE,
			Box::new(move |ready| {
				if let Some(shared) = weak.upgrade() {
					Client(shared).on_connect_ready(ready);
				}
			}),
		)?;
		self.0.connect_watcher.set(Some(id));

		if let Some(timeout) = self.0.config.connect_timeout {
			let weak = Rc::downgrade(&self.0);
			let id = self.reactor().timer_start(
				timeout,
				None,
				Box::new(move |expirations, ready| {
					if let Some(shared) = weak.upgrade() {
						Client(shared).on_connect_timeout(expirations, ready);
					}
				}),
			)?;
			self.0.connect_timer.set(Some(id));
		}
		Ok(())
	}

	fn on_connect_ready(&self, ready: Ready) {
		if self.0.phase.get() != Phase::Connecting {
			return;
		}
		trace!("client fd={} connect ready {:?}", self.0.conn.fd(), ready);
		self.stop_connect();

		let kind = if ready.is_error() {
			Some(ErrorKind::SocketError)
		} else if ready.is_hup() {
			Some(ErrorKind::SocketHangUp)
		} else {
			match self.0.conn.with_transport(|t| t.socket().take_error()) {
				Ok(None) => None,
				Ok(Some(e)) => {
					debug!("client {} connect refused: {}", self.0.remote, e);
					Some(ErrorKind::ConnectedCheckFailed)
				}
				Err(_) => Some(ErrorKind::ConnectedCheckFailed),
			}
		};

		match kind {
			Some(kind) => self.0.conn.close_with(Some(kind)),
			None => {
				if let Err(e) = self.promote() {
					warn!("client {} promotion failed: {}", self.0.remote, e);
					self.0.conn.close_with(Some(ErrorKind::ConnectFailed));
				}
			}
		}
	}

	fn on_connect_timeout(&self, expirations: u64, ready: Ready) {
		// one-shot: the reactor already released it
		self.0.connect_timer.set(None);
		if expirations == 0 || !ready.is_readable() || self.0.phase.get() != Phase::Connecting {
			return;
		}
		self.stop_connect();
		self.0.conn.close_with(Some(ErrorKind::ConnectTimeout));
	}

	/// The connect is verified: hand the socket to the connection.
	fn promote(&self) -> std::io::Result<()> {
		// the connection registers the same fd; the connect watcher must be gone first
		self.stop_connect();
		self.0.conn.with_transport(|t| {
			t.socket_mut().mark_connected();
			t.establish(Role::Client)
		})?;
		self.0.conn.start()?;
		self.0.phase.set(Phase::Connected);
		debug!("client fd={} connected to {}", self.0.conn.fd(), self.0.remote);

		let hook = self.0.on_connect.borrow_mut().take();
		if let Some(mut hook) = hook {
			hook(self);
			if self.0.conn.state() != Lifecycle::Freed {
				let mut slot = self.0.on_connect.borrow_mut();
				if slot.is_none() {
					*slot = Some(hook);
				}
			}
		}
		Ok(())
	}

	fn stop_connect(&self) {
		if let Some(id) = self.0.connect_watcher.take() {
			self.reactor().watcher_stop(id);
		}
		if let Some(id) = self.0.connect_timer.take() {
			self.reactor().timer_stop(id);
		}
	}

	fn stop_reconnect(&self) {
		if let Some(id) = self.0.reconnect_timer.take() {
			self.reactor().timer_stop(id);
		}
	}

	/// Unwinds an attempt that failed before the connect syscall.
	fn rollback(&self) {
		self.stop_connect();
		self.0.conn.abandon();
		self.0.phase.set(Phase::Disconnected);
	}

	/// Teardown of the connection, whatever closed it.
	fn on_closed(&self, kind: Option<ErrorKind>) {
		self.0.phase.set(Phase::Disconnected);
		if self.0.reconnect.get() && !self.0.suppress.get() && self.0.conn.state() != Lifecycle::Freed {
			debug!("client {} closed ({:?}), reconnect scheduled", self.0.remote, kind);
			self.schedule_reconnect();
		}
	}

	fn schedule_reconnect(&self) {
		if self.0.reconnect_timer.get().is_some() {
			return;
		}
		let Some(interval) = self.0.config.reconnect else {
			return;
		};
		let weak = Rc::downgrade(&self.0);
		let started = self.reactor().timer_start(
			interval,
			None,
			Box::new(move |expirations, ready| {
				if let Some(shared) = weak.upgrade() {
					Client(shared).on_reconnect(expirations, ready);
				}
			}),
		);
		match started {
			Ok(id) => self.0.reconnect_timer.set(Some(id)),
			Err(e) => warn!("client {} reconnect timer failed: {}", self.0.remote, e),
		}
	}

	fn on_reconnect(&self, expirations: u64, ready: Ready) {
		self.0.reconnect_timer.set(None);
		if expirations == 0 || !ready.is_readable() {
			return;
		}
		if !self.0.reconnect.get() || self.0.phase.get() != Phase::Disconnected {
			return;
		}
		debug!("client {} reconnecting", self.0.remote);

		match self.attempt() {
			Ok(()) => {}
			Err(Failure::Setup(e)) => {
				warn!("client {} reconnect setup failed: {}", self.0.remote, e);
				self.rollback();
				self.schedule_reconnect();
			}
			Err(Failure::Connect(e)) => {
				warn!("client {} reconnect failed: {}", self.0.remote, e);
				self.0.conn.close_with(Some(ErrorKind::ConnectFailed));
			}
		}
	}

	/// Stops for good: no reconnect, close hook without an error.
	pub fn stop(&self) {
		self.0.reconnect.set(false);
		self.stop_reconnect();
		self.stop_connect();
		self.0.conn.close();
		self.0.phase.set(Phase::Disconnected);
	}

	/// Stops, then cleans up the connection.
	pub fn cleanup(&self) {
		self.stop();
		self.0.conn.cleanup();
		let hook = self.0.on_connect.borrow_mut().take();
		drop(hook);
	}

	pub fn delete(self) {
		self.cleanup();
	}
}

impl<T: Transport> Endpoint for Client<T> {
	fn start(&self) -> std::io::Result<()> {
		Client::start(self)
	}

	fn read(&self, buf: &mut [u8]) -> Status {
		self.0.conn.read(buf)
	}

	fn write(&self, buf: &[u8]) -> Status {
		self.0.conn.write(buf)
	}

	/// Closes the connection; a configured reconnect still follows.
	fn close(&self) {
		self.0.conn.close()
	}
}

impl<T: Transport> Drop for ClientShared<T> {
	fn drop(&mut self) {
		let reactor = self.conn.reactor();
		if let Some(id) = self.connect_watcher.take() {
			reactor.watcher_stop(id);
		}
		if let Some(id) = self.connect_timer.take() {
			reactor.timer_stop(id);
		}
		if let Some(id) = self.reconnect_timer.take() {
			reactor.timer_stop(id);
		}
	}
}
