use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use log::{debug, trace, warn};
use crate::addr::SockAddr;
use crate::config::ConnectionConfig;
use crate::error::{ErrorKind, SocketError, Status};
use crate::reactor::{Reactor, Ready, TimerId, WatcherId};
use crate::socket::Socket;
use super::{Endpoint, Lifecycle, Transport};

type Hook<T> = RefCell<Option<Box<dyn FnMut(&Connection<T>)>>>;
type TimeoutHook<T> = RefCell<Option<Box<dyn FnMut(&Connection<T>) -> bool>>>;
type ErrorHook<T> = RefCell<Option<Box<dyn FnMut(&Connection<T>, ErrorKind)>>>;
type CloseHook<T> = RefCell<Option<Box<dyn FnMut(&Connection<T>, Option<ErrorKind>)>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
	Read,
	Write,
}

pub(crate) struct Shared<T: Transport> {
	reactor: Rc<dyn Reactor>,
	state: Cell<Lifecycle>,
	transport: RefCell<T>,
	io: Cell<Option<WatcherId>>,
	read_timer: Cell<Option<TimerId>>,
	write_timer: Cell<Option<TimerId>>,
	config: Cell<ConnectionConfig>,

	on_read: Hook<T>,
	on_write: Hook<T>,
	on_read_timeout: TimeoutHook<T>,
	on_write_timeout: TimeoutHook<T>,
	on_error: ErrorHook<T>,
	on_close: CloseHook<T>,

	/// Owner registrations living on this socket; released before it closes.
	release: RefCell<Option<Box<dyn FnMut()>>>,
	/// Owner bookkeeping run after the close hook.
	teardown: RefCell<Option<Box<dyn FnMut(Option<ErrorKind>)>>>,

	data: RefCell<Option<Rc<dyn Any>>>,
	/// Cleanup was requested while a close was running.
	free_after_close: Cell<bool>,
}

/// A transport plus its I/O watcher and read/write timeout timers.
///
/// Cheap to clone: clones are handles to the same connection. The reactor
/// only holds weak references, so the connection lives exactly as long as
/// the application keeps a handle.
///
/// # Read/write protocol
///
/// Every successful read or write marks that direction pending again so
/// the hook fires on the next iteration even though the edge-triggered
/// watcher reports no new edge. Would-block arms the direction's timeout
/// timer; peer close and hard errors close the connection.
///
/// # Hooks
///
/// Each hook is taken out of its slot while it runs, so it may call back
/// into the connection (read, write, close, even replace itself).
pub struct Connection<T: Transport = Socket>(pub(crate) Rc<Shared<T>>);

impl<T: Transport> Clone for Connection<T> {
	fn clone(&self) -> Self {
		Connection(Rc::clone(&self.0))
	}
}

impl<T: Transport> Connection<T> {
	pub fn new(reactor: Rc<dyn Reactor>, transport: T) -> Self {
		Self::with_config(reactor, transport, ConnectionConfig::default())
	}

	pub fn with_config(reactor: Rc<dyn Reactor>, transport: T, config: ConnectionConfig) -> Self {
		Connection(Rc::new(Shared {
			reactor,
			state: Cell::new(Lifecycle::Created),
			transport: RefCell::new(transport),
			io: Cell::new(None),
			read_timer: Cell::new(None),
			write_timer: Cell::new(None),
			config: Cell::new(config),
			on_read: RefCell::new(None),
			on_write: RefCell::new(None),
			on_read_timeout: RefCell::new(None),
			on_write_timeout: RefCell::new(None),
			on_error: RefCell::new(None),
			on_close: RefCell::new(None),
			release: RefCell::new(None),
			teardown: RefCell::new(None),
			data: RefCell::new(None),
			free_after_close: Cell::new(false),
		}))
	}

	// ---------------------------------------------------------------------
	// Hooks
	// ---------------------------------------------------------------------

	/// Called when the socket is readable.
	pub fn on_read<F: FnMut(&Connection<T>) + 'static>(&self, hook: F) {
		*self.0.on_read.borrow_mut() = Some(Box::new(hook));
	}

	/// Called when the socket is writable.
	pub fn on_write<F: FnMut(&Connection<T>) + 'static>(&self, hook: F) {
		*self.0.on_write.borrow_mut() = Some(Box::new(hook));
	}

	/// Called when a read has been blocked for the read timeout.
	/// Return `true` to keep the connection open.
	pub fn on_read_timeout<F: FnMut(&Connection<T>) -> bool + 'static>(&self, hook: F) {
		*self.0.on_read_timeout.borrow_mut() = Some(Box::new(hook));
	}

	/// Write-side counterpart of [`Connection::on_read_timeout`].
	pub fn on_write_timeout<F: FnMut(&Connection<T>) -> bool + 'static>(&self, hook: F) {
		*self.0.on_write_timeout.borrow_mut() = Some(Box::new(hook));
	}

	/// Called first when the connection closes because of a failure.
	pub fn on_error<F: FnMut(&Connection<T>, ErrorKind) + 'static>(&self, hook: F) {
		*self.0.on_error.borrow_mut() = Some(Box::new(hook));
	}

	/// Called on every close, with the failure if there was one.
	pub fn on_close<F: FnMut(&Connection<T>, Option<ErrorKind>) + 'static>(&self, hook: F) {
		*self.0.on_close.borrow_mut() = Some(Box::new(hook));
	}

	pub(crate) fn set_release<F: FnMut() + 'static>(&self, hook: F) {
		*self.0.release.borrow_mut() = Some(Box::new(hook));
	}

	pub(crate) fn set_teardown<F: FnMut(Option<ErrorKind>) + 'static>(&self, hook: F) {
		*self.0.teardown.borrow_mut() = Some(Box::new(hook));
	}

	/// Runs the hook in `slot` with the slot emptied.
	///
	/// The hook goes back afterwards unless the connection was freed or the
	/// hook installed a replacement.
	fn invoke<H: ?Sized, R>(&self, slot: &RefCell<Option<Box<H>>>, call: impl FnOnce(&mut H) -> R) -> Option<R> {
		let mut hook = slot.borrow_mut().take()?;
		let result = call(&mut *hook);
		if self.0.state.get() != Lifecycle::Freed {
			let mut current = slot.borrow_mut();
			if current.is_none() {
				*current = Some(hook);
				return Some(result);
			}
		}
		drop(hook);
		Some(result)
	}

	// ---------------------------------------------------------------------
	// Introspection
	// ---------------------------------------------------------------------

	pub fn state(&self) -> Lifecycle {
		self.0.state.get()
	}

	/// Descriptor of the underlying socket, -1 when closed.
	pub fn fd(&self) -> i32 {
		self.0.transport.borrow().socket().fd()
	}

	pub fn local_addr(&self) -> Option<SockAddr> {
		self.0.transport.borrow().socket().local_addr().cloned()
	}

	pub fn peer_addr(&self) -> Option<SockAddr> {
		self.0.transport.borrow().socket().peer_addr().cloned()
	}

	/// True while the I/O watcher is registered.
	pub fn is_watching(&self) -> bool {
		self.0.io.get().is_some()
	}

	pub fn is_read_timer_armed(&self) -> bool {
		self.0.read_timer.get().is_some()
	}

	pub fn is_write_timer_armed(&self) -> bool {
		self.0.write_timer.get().is_some()
	}

	pub fn config(&self) -> ConnectionConfig {
		self.0.config.get()
	}

	/// Applies to timers armed from now on.
	pub fn set_config(&self, config: ConnectionConfig) {
		self.0.config.set(config);
	}

	pub fn reactor(&self) -> &Rc<dyn Reactor> {
		&self.0.reactor
	}

	/// Attaches application data to the connection.
	pub fn set_data<D: Any>(&self, data: Rc<D>) {
		*self.0.data.borrow_mut() = Some(data);
	}

	/// The attached data, if it is a `D`.
	pub fn data<D: Any>(&self) -> Option<Rc<D>> {
		let data = self.0.data.borrow().clone()?;
		data.downcast::<D>().ok()
	}

	/// Runs `f` with the transport borrowed mutably.
	///
	/// Must not be called from inside another `with_transport`.
	pub fn with_transport<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		f(&mut self.0.transport.borrow_mut())
	}

	pub(crate) fn downgrade(&self) -> std::rc::Weak<Shared<T>> {
		Rc::downgrade(&self.0)
	}

	// ---------------------------------------------------------------------
	// Lifecycle
	// ---------------------------------------------------------------------

	/// Marks the connection as being set up by its owner.
	///
	/// From here a close runs the full close sequence even though the
	/// watcher is not registered yet.
	pub(crate) fn begin(&self) -> std::io::Result<()> {
		match self.0.state.get() {
			Lifecycle::Created | Lifecycle::Closed | Lifecycle::Starting => {
				self.0.state.set(Lifecycle::Starting);
				Ok(())
			}
			Lifecycle::Freed => Err(SocketError::InvalidState("connection freed").into()),
			_ => Err(SocketError::InvalidState("connection already open").into()),
		}
	}

	/// Undoes `begin` without running any hook.
	pub(crate) fn abandon(&self) {
		if self.0.state.get() != Lifecycle::Starting {
			return;
		}
		self.release_owner();
		self.stop_registrations();
		self.with_transport(|t| {
			t.shutdown();
			t.socket_mut().close();
		});
		self.0.state.set(Lifecycle::Closed);
	}

	/// Starts watching the socket for read and write readiness.
	///
	/// On failure the state is left as it was, so an owner midway through
	/// its own setup can still unwind.
	pub fn start(&self) -> std::io::Result<()> {
		let prior = self.0.state.get();
		self.begin()?;
		let fd = self.fd();
		if fd == -1 {
			self.0.state.set(prior);
			return Err(SocketError::NotOpen.into());
		}

		let weak = self.downgrade();
		let id = self.0.reactor.watcher_start(
			fd,
			Ready::READ | Ready::WRITE,
			Box::new(move |ready| {
				if let Some(shared) = weak.upgrade() {
					Connection(shared).on_ready(ready);
				}
			}),
		);
		match id {
			Ok(id) => {
				self.0.io.set(Some(id));
				self.0.state.set(Lifecycle::Open);
				debug!("connection fd={} open", fd);
				Ok(())
			}
			Err(e) => {
				warn!("connection fd={} watcher registration failed: {}", fd, e);
				self.0.state.set(prior);
				Err(e)
			}
		}
	}

	/// Reads from the transport.
	pub fn read(&self, buf: &mut [u8]) -> Status {
		if self.0.state.get() != Lifecycle::Open {
			return Status::None;
		}
		let status = self.0.transport.borrow_mut().read(buf);
		self.finish_read(status)
	}

	/// Writes to the transport.
	pub fn write(&self, buf: &[u8]) -> Status {
		if self.0.state.get() != Lifecycle::Open {
			return Status::None;
		}
		let status = self.0.transport.borrow_mut().write(buf);
		self.finish_write(status)
	}

	pub(crate) fn finish_read(&self, status: Status) -> Status {
		self.finish(Direction::Read, status)
	}

	pub(crate) fn finish_write(&self, status: Status) -> Status {
		self.finish(Direction::Write, status)
	}

	fn finish(&self, dir: Direction, status: Status) -> Status {
		match status {
			Status::Ok(_) => {
				self.stop_timer(dir);
				if let Some(id) = self.0.io.get() {
					let ready = match dir {
						Direction::Read => Ready::READ,
						Direction::Write => Ready::WRITE,
					};
					self.0.reactor.watcher_pending_set(id, ready);
				}
			}
			Status::NotReady => self.arm_timer(dir),
			Status::ReadNotReady => self.arm_timer(Direction::Read),
			Status::WriteNotReady => self.arm_timer(Direction::Write),
			Status::Close => self.close_with(Some(ErrorKind::SocketClose)),
			Status::Error(_) => self.close_with(Some(match dir {
				Direction::Read => ErrorKind::ReadError,
				Direction::Write => ErrorKind::WriteError,
			})),
			Status::None | Status::InProgress | Status::InvalidBuffer => {}
		}
		status
	}

	fn timer_slot(&self, dir: Direction) -> &Cell<Option<TimerId>> {
		match dir {
			Direction::Read => &self.0.read_timer,
			Direction::Write => &self.0.write_timer,
		}
	}

	/// Arms the repeating timeout timer for `dir` unless already armed.
	fn arm_timer(&self, dir: Direction) {
		let slot = self.timer_slot(dir);
		if slot.get().is_some() {
			return;
		}
		let config = self.0.config.get();
		let timeout = match dir {
			Direction::Read => config.read_timeout,
			Direction::Write => config.write_timeout,
		};
		let Some(timeout) = timeout else {
			return;
		};

		let weak = self.downgrade();
		let started = self.0.reactor.timer_start(
			timeout,
			Some(timeout),
			Box::new(move |expirations, ready| {
				if let Some(shared) = weak.upgrade() {
					Connection(shared).on_timeout(dir, expirations, ready);
				}
			}),
		);
		match started {
			Ok(id) => slot.set(Some(id)),
			Err(e) => warn!("connection fd={} {:?} timer failed: {}", self.fd(), dir, e),
		}
	}

	fn stop_timer(&self, dir: Direction) {
		if let Some(id) = self.timer_slot(dir).take() {
			self.0.reactor.timer_stop(id);
		}
	}

	fn on_ready(&self, ready: Ready) {
		if self.0.state.get() != Lifecycle::Open {
			return;
		}
		trace!("connection fd={} ready {:?}", self.fd(), ready);

		if ready.is_error() {
			self.close_with(Some(ErrorKind::SocketError));
			return;
		}
		if ready.is_hup() {
			self.close_with(Some(ErrorKind::SocketHangUp));
			return;
		}
		if ready.is_readable() {
			self.stop_timer(Direction::Read);
			self.invoke(&self.0.on_read, |hook| hook(self));
		}
		if ready.is_writable() && self.0.state.get() == Lifecycle::Open {
			self.stop_timer(Direction::Write);
			self.invoke(&self.0.on_write, |hook| hook(self));
		}
	}

	fn on_timeout(&self, dir: Direction, expirations: u64, ready: Ready) {
		if expirations == 0 || !ready.is_readable() || self.0.state.get() != Lifecycle::Open {
			return;
		}
		self.stop_timer(dir);

		let (slot, kind) = match dir {
			Direction::Read => (&self.0.on_read_timeout, ErrorKind::ReadTimeout),
			Direction::Write => (&self.0.on_write_timeout, ErrorKind::WriteTimeout),
		};
		let handled = self.invoke(slot, |hook| hook(self)).unwrap_or(false);
		if handled {
			trace!("connection fd={} {} handled by hook", self.fd(), kind);
		} else {
			self.close_with(Some(kind));
		}
	}

	/// Closes without an error.
	pub fn close(&self) {
		self.close_with(None);
	}

	/// The close sequence: error hook, registrations, transport shutdown,
	/// socket, close hook, owner teardown.
	pub(crate) fn close_with(&self, kind: Option<ErrorKind>) {
		match self.0.state.get() {
			Lifecycle::Starting | Lifecycle::Open => {}
			Lifecycle::Created => {
				// never started: nothing to report
				self.with_transport(|t| t.socket_mut().close());
				self.0.state.set(Lifecycle::Closed);
				return;
			}
			_ => return,
		}
		self.0.state.set(Lifecycle::Closing);
		let fd = self.fd();
		match kind {
			Some(ErrorKind::SocketClose) | None => debug!("connection fd={} closing ({:?})", fd, kind),
			Some(k) => warn!("connection fd={} closing: {}", fd, k),
		}

		if let Some(k) = kind {
			self.invoke(&self.0.on_error, |hook| hook(self, k));
		}

		self.release_owner();
		self.stop_registrations();
		self.with_transport(|t| {
			t.shutdown();
			t.socket_mut().close();
		});
		self.0.state.set(Lifecycle::Closed);

		self.invoke(&self.0.on_close, |hook| hook(self, kind));
		self.invoke(&self.0.teardown, |hook| hook(kind));

		if self.0.free_after_close.get() {
			self.free();
		}
	}

	fn release_owner(&self) {
		let slot = &self.0.release;
		let hook = slot.borrow_mut().take();
		if let Some(mut hook) = hook {
			hook();
			let mut current = slot.borrow_mut();
			if current.is_none() {
				*current = Some(hook);
			}
		}
	}

	fn stop_registrations(&self) {
		if let Some(id) = self.0.io.take() {
			self.0.reactor.watcher_stop(id);
		}
		self.stop_timer(Direction::Read);
		self.stop_timer(Direction::Write);
	}

	/// Closes if needed, then drops every hook and the attached data.
	///
	/// Requested from inside a close, it takes effect once that close is
	/// done. The connection cannot be started again.
	pub fn cleanup(&self) {
		match self.0.state.get() {
			Lifecycle::Freed => return,
			Lifecycle::Closing => {
				self.0.free_after_close.set(true);
				return;
			}
			_ => {}
		}
		self.close_with(None);
		self.free();
	}

	fn free(&self) {
		if self.0.state.get() == Lifecycle::Freed {
			return;
		}
		self.stop_registrations();
		self.0.state.set(Lifecycle::Freed);
		self.0.free_after_close.set(false);

		let hooks = (
			self.0.on_read.take(),
			self.0.on_write.take(),
			self.0.on_read_timeout.take(),
			self.0.on_write_timeout.take(),
			self.0.on_error.take(),
			self.0.on_close.take(),
			self.0.release.take(),
			self.0.teardown.take(),
		);
		let data = self.0.data.take();
		drop(hooks);
		drop(data);
		trace!("connection freed");
	}

	/// Cleans up and drops this handle.
	pub fn delete(self) {
		self.cleanup();
	}
}

impl<T: Transport> Endpoint for Connection<T> {
	fn start(&self) -> std::io::Result<()> {
		Connection::start(self)
	}

	fn read(&self, buf: &mut [u8]) -> Status {
		Connection::read(self, buf)
	}

	fn write(&self, buf: &[u8]) -> Status {
		Connection::write(self, buf)
	}

	fn close(&self) {
		Connection::close(self)
	}
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("fd", &self.fd())
			.field("state", &self.state())
			.finish()
	}
}

impl<T: Transport> Drop for Shared<T> {
	fn drop(&mut self) {
		// The last handle is gone: release registrations, no hooks.
		if let Some(id) = self.io.take() {
			self.reactor.watcher_stop(id);
		}
		if let Some(id) = self.read_timer.take() {
			self.reactor.timer_stop(id);
		}
		if let Some(id) = self.write_timer.take() {
			self.reactor.timer_stop(id);
		}
	}
}
