use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use log::{debug, trace, warn};
use crate::addr::{Family, SockAddr};
use crate::config::AcceptorConfig;
use crate::error::{ErrorKind, SocketError, Status};
use crate::reactor::{Reactor, Ready, WatcherId};
use crate::socket::{SockKind, Socket};
use super::{Connection, Endpoint, Role, Transport};

type AcceptHook = RefCell<Option<Box<dyn FnMut(&Socket) -> bool>>>;
type SetupHook<T> = RefCell<Option<Box<dyn FnMut(&Server<T>) -> bool>>>;

struct AcceptorShared<T: Transport> {
	reactor: Rc<dyn Reactor>,
	addr: SockAddr,
	config: AcceptorConfig,
	make: Box<dyn Fn(Socket) -> T>,
	socket: RefCell<Socket>,
	watcher: Cell<Option<WatcherId>>,
	listening: Cell<bool>,

	on_accept: AcceptHook,
	on_stop: RefCell<Option<Box<dyn FnMut()>>>,
	on_error: RefCell<Option<Box<dyn FnMut(ErrorKind)>>>,
	on_setup: SetupHook<T>,
}

/// A listening socket that turns every accepted connection into a [`Server`].
///
/// When the listening socket becomes readable the acceptor drains the whole
/// accept queue in one go. For each descriptor:
///
/// 1. the accept hook decides whether to keep it (rejected ones are closed)
/// 2. the transport factory wraps it and the transport is established
/// 3. a [`Server`] is built and handed to the setup hook
/// 4. the server is started
///
/// The application owns a server from the setup hook on; one nobody keeps a
/// handle to is dropped, which releases its registrations.
///
/// # Example
/// ```ignore
/// use std::rc::Rc;
/// use std::cell::RefCell;
/// use wirelink::{Acceptor, AcceptorConfig, EventLoop, SockAddr};
///
/// let reactor = Rc::new(EventLoop::new()?);
/// let servers = Rc::new(RefCell::new(Vec::new()));
/// let acceptor = Acceptor::new(reactor.clone(), SockAddr::ipv4("0.0.0.0", 10000)?, AcceptorConfig::new());
/// let keep = servers.clone();
/// acceptor.on_setup(move |server| {
///     server.connection().on_read(|conn| { /* ... */ });
///     keep.borrow_mut().push(server.clone());
///     true
/// });
/// acceptor.start()?;
/// ```
pub struct Acceptor<T: Transport = Socket>(Rc<AcceptorShared<T>>);

impl<T: Transport> Clone for Acceptor<T> {
	fn clone(&self) -> Self {
		Acceptor(Rc::clone(&self.0))
	}
}

impl Acceptor<Socket> {
	/// Plain acceptor: servers talk over the accepted socket itself.
	pub fn new(reactor: Rc<dyn Reactor>, addr: SockAddr, config: AcceptorConfig) -> Self {
		Self::with_factory(reactor, addr, config, |socket| socket)
	}
}

impl<T: Transport> Acceptor<T> {
	/// Acceptor whose servers wrap each accepted socket with `make`.
	pub fn with_factory<F>(reactor: Rc<dyn Reactor>, addr: SockAddr, config: AcceptorConfig, make: F) -> Self
	where
		F: Fn(Socket) -> T + 'static,
	{
		Acceptor(Rc::new(AcceptorShared {
			reactor,
			addr,
			config,
			make: Box::new(make),
			socket: RefCell::new(Socket::closed(SockKind::Stream)),
			watcher: Cell::new(None),
			listening: Cell::new(false),
			on_accept: RefCell::new(None),
			on_stop: RefCell::new(None),
			on_error: RefCell::new(None),
			on_setup: RefCell::new(None),
		}))
	}

	/// Decides per accepted socket whether to keep it.
	pub fn on_accept<F: FnMut(&Socket) -> bool + 'static>(&self, hook: F) {
		*self.0.on_accept.borrow_mut() = Some(Box::new(hook));
	}

	/// Called once the acceptor stopped listening.
	pub fn on_stop<F: FnMut() + 'static>(&self, hook: F) {
		*self.0.on_stop.borrow_mut() = Some(Box::new(hook));
	}

	/// Called with ListenFailed or AcceptFailed.
	pub fn on_error<F: FnMut(ErrorKind) + 'static>(&self, hook: F) {
		*self.0.on_error.borrow_mut() = Some(Box::new(hook));
	}

	/// Called with each new server before it starts. Return `false` to drop it.
	pub fn on_setup<F: FnMut(&Server<T>) -> bool + 'static>(&self, hook: F) {
		*self.0.on_setup.borrow_mut() = Some(Box::new(hook));
	}

	fn invoke<H: ?Sized, R>(slot: &RefCell<Option<Box<H>>>, call: impl FnOnce(&mut H) -> R) -> Option<R> {
		let mut hook = slot.borrow_mut().take()?;
		let result = call(&mut *hook);
		let mut current = slot.borrow_mut();
		if current.is_none() {
			*current = Some(hook);
		}
		Some(result)
	}

	pub fn is_listening(&self) -> bool {
		self.0.listening.get()
	}

	/// Address actually listened on (ephemeral port resolved).
	pub fn local_addr(&self) -> Option<SockAddr> {
		self.0.socket.borrow().local_addr().cloned()
	}

	pub fn fd(&self) -> i32 {
		self.0.socket.borrow().fd()
	}

	pub fn config(&self) -> &AcceptorConfig {
		&self.0.config
	}

	/// Opens, configures and binds the listening socket, then watches it.
	pub fn start(&self) -> std::io::Result<()> {
		if self.0.listening.get() {
			return Err(SocketError::InvalidState("acceptor already listening").into());
		}
		match self.listen() {
			Ok(()) => {
				self.0.listening.set(true);
				debug!("acceptor listening on {}", self.local_addr().as_ref().unwrap_or(&self.0.addr));
				Ok(())
			}
			Err(e) => {
				warn!("acceptor on {} failed: {}", self.0.addr, e);
				if let Some(id) = self.0.watcher.take() {
					self.0.reactor.watcher_stop(id);
				}
				self.0.socket.borrow_mut().close();
				Self::invoke(&self.0.on_error, |hook| hook(ErrorKind::ListenFailed));
				Err(e)
			}
		}
	}

	fn listen(&self) -> std::io::Result<()> {
		let addr = &self.0.addr;
		let config = &self.0.config;
		let fd = {
			let mut socket = self.0.socket.borrow_mut();
			socket.open(addr.family())?;
			let is_tcp = matches!(addr.family(), Family::Ipv4 | Family::Ipv6);
			config.reuse.apply(&*socket)?;
			config.tcp.apply(&*socket, is_tcp)?;
			config.buffers.apply(&*socket)?;
			socket.listen(addr, config.backlog)?;
			socket.fd()
		};

		let weak = Rc::downgrade(&self.0);
		let id = self.0.reactor.watcher_start(
			fd,
			Ready::READ,
			Box::new(move |ready| {
				if let Some(shared) = weak.upgrade() {
					Acceptor(shared).on_ready(ready);
				}
			}),
		)?;
		self.0.watcher.set(Some(id));
		Ok(())
	}

	/// Drains the accept queue.
	fn on_ready(&self, ready: Ready) {
		trace!("acceptor fd={} ready {:?}", self.fd(), ready);
		while self.0.listening.get() {
			let accepted = self.0.socket.borrow().accept();
			match accepted {
				Ok(socket) => self.admit(socket),
				Err(Status::NotReady) => break,
				Err(status) => {
					warn!("acceptor fd={} accept failed: {}", self.fd(), status);
					Self::invoke(&self.0.on_error, |hook| hook(ErrorKind::AcceptFailed));
					self.stop();
					break;
				}
			}
		}
	}

	fn admit(&self, socket: Socket) {
		trace!("acceptor accepted fd={} from {:?}", socket.fd(), socket.peer_addr());
		let keep = Self::invoke(&self.0.on_accept, |hook| hook(&socket)).unwrap_or(true);
		if !keep {
			debug!("acceptor rejected fd={}", socket.fd());
			return;
		}

		let is_tcp = matches!(self.0.addr.family(), Family::Ipv4 | Family::Ipv6);
		if let Err(e) = self.0.config.tcp.apply(&socket, is_tcp) {
			warn!("acceptor fd={} socket options: {}", socket.fd(), e);
		}

		let mut transport = (self.0.make)(socket);
		if let Err(e) = transport.establish(Role::Server) {
			warn!("acceptor fd={} establish failed: {}", transport.socket().fd(), e);
			return;
		}

		let server = Server {
			conn: Connection::with_config(self.0.reactor.clone(), transport, self.0.config.connection),
			acceptor: Rc::downgrade(&self.0),
		};
		let keep = Self::invoke(&self.0.on_setup, |hook| hook(&server)).unwrap_or(true);
		if !keep {
			server.delete();
			return;
		}
		if let Err(e) = server.conn.start() {
			warn!("server fd={} start failed: {}", server.conn.fd(), e);
			server.delete();
		}
	}

	/// Stops listening and closes the listening socket. Idempotent.
	pub fn stop(&self) {
		if !self.0.listening.replace(false) {
			return;
		}
		if let Some(id) = self.0.watcher.take() {
			self.0.reactor.watcher_stop(id);
		}
		self.0.socket.borrow_mut().close();
		if let SockAddr::Unix(unix) = &self.0.addr {
			if !unix.is_abstract() && !unix.path().is_empty() {
				use std::os::unix::ffi::OsStrExt;
				let path = std::ffi::OsStr::from_bytes(unix.path());
				if let Err(e) = std::fs::remove_file(path) {
					if e.kind() != std::io::ErrorKind::NotFound {
						warn!("acceptor on {} could not remove socket file: {}", self.0.addr, e);
					}
				}
			}
		}
		debug!("acceptor on {} stopped", self.0.addr);
		Self::invoke(&self.0.on_stop, |hook| hook());
	}
}

impl<T: Transport> Drop for AcceptorShared<T> {
	fn drop(&mut self) {
		if let Some(id) = self.watcher.take() {
			self.reactor.watcher_stop(id);
		}
	}
}

/// One accepted connection.
///
/// Keeps a weak link to the acceptor that produced it.
pub struct Server<T: Transport = Socket> {
	conn: Connection<T>,
	acceptor: Weak<AcceptorShared<T>>,
}

impl<T: Transport> Clone for Server<T> {
	fn clone(&self) -> Self {
		Server {
			conn: self.conn.clone(),
			acceptor: self.acceptor.clone(),
		}
	}
}

impl<T: Transport> Server<T> {
	pub fn connection(&self) -> &Connection<T> {
		&self.conn
	}

	/// The acceptor, while it is still alive.
	pub fn acceptor(&self) -> Option<Acceptor<T>> {
		self.acceptor.upgrade().map(Acceptor)
	}

	pub fn peer_addr(&self) -> Option<SockAddr> {
		self.conn.peer_addr()
	}

	pub fn cleanup(&self) {
		self.conn.cleanup();
	}

	pub fn delete(self) {
		self.conn.cleanup();
	}
}

impl<T: Transport> Endpoint for Server<T> {
	fn start(&self) -> std::io::Result<()> {
		self.conn.start()
	}

	fn read(&self, buf: &mut [u8]) -> Status {
		self.conn.read(buf)
	}

	fn write(&self, buf: &[u8]) -> Status {
		self.conn.write(buf)
	}

	fn close(&self) {
		self.conn.close()
	}
}
