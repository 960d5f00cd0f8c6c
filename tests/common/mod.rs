#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::Duration;
use wirelink::{EncryptedSession, Method, Reactor, Ready, SessionIo, SessionProvider, Socket, TimerFn, TimerId, WatcherFn, WatcherId};

struct Watch {
	fd: RawFd,
	interest: Ready,
	pending: Ready,
	callback: Option<WatcherFn>,
}

struct Timer {
	after: Duration,
	repeat: Option<Duration>,
	callback: Option<TimerFn>,
}

/// Reactor driven by hand: nothing fires unless the test says so.
#[derive(Default)]
pub struct ManualReactor {
	next: Cell<u64>,
	watchers: RefCell<BTreeMap<u64, Watch>>,
	timers: RefCell<BTreeMap<u64, Timer>>,
	pub fail_watchers: Cell<bool>,
	pub broken: Cell<bool>,
}

impl ManualReactor {
	pub fn new() -> Rc<Self> {
		Rc::new(Self::default())
	}

	fn next_id(&self) -> u64 {
		self.next.set(self.next.get() + 1);
		self.next.get()
	}

	/// Watcher registered on `fd`, if any.
	pub fn watcher_on(&self, fd: RawFd) -> Option<u64> {
		self.watchers.borrow().iter().find(|(_, w)| w.fd == fd).map(|(&id, _)| id)
	}

	pub fn watching(&self, fd: RawFd) -> bool {
		self.watcher_on(fd).is_some()
	}

	pub fn interest(&self, fd: RawFd) -> Option<Ready> {
		let id = self.watcher_on(fd)?;
		self.watchers.borrow().get(&id).map(|w| w.interest)
	}

	pub fn watcher_count(&self) -> usize {
		self.watchers.borrow().len()
	}

	/// Readiness queued by `watcher_pending_set` for `fd`.
	pub fn pending(&self, fd: RawFd) -> Ready {
		match self.watcher_on(fd) {
			Some(id) => self.watchers.borrow().get(&id).map_or(Ready::EMPTY, |w| w.pending),
			None => Ready::EMPTY,
		}
	}

	/// Delivers `ready` to the watcher on `fd`. Returns false if none.
	pub fn fire(&self, fd: RawFd, ready: Ready) -> bool {
		let Some(id) = self.watcher_on(fd) else {
			return false;
		};
		let taken = self.watchers.borrow_mut().get_mut(&id).and_then(|w| {
			w.pending = Ready::EMPTY;
			w.callback.take()
		});
		let Some(mut callback) = taken else {
			return false;
		};
		callback(ready);
		let leftover = {
			let mut watchers = self.watchers.borrow_mut();
			match watchers.get_mut(&id) {
				Some(w) if w.callback.is_none() => {
					w.callback = Some(callback);
					None
				}
				_ => Some(callback),
			}
		};
		drop(leftover);
		true
	}

	/// Armed timers as (id, after, repeat), oldest first.
	pub fn timers(&self) -> Vec<(u64, Duration, Option<Duration>)> {
		self.timers.borrow().iter().map(|(&id, t)| (id, t.after, t.repeat)).collect()
	}

	pub fn timer_count(&self) -> usize {
		self.timers.borrow().len()
	}

	/// Timers armed with exactly `after`.
	pub fn timers_after(&self, after: Duration) -> Vec<u64> {
		self.timers.borrow().iter().filter(|(_, t)| t.after == after).map(|(&id, _)| id).collect()
	}

	pub fn fire_timer(&self, id: u64) -> bool {
		self.fire_timer_with(id, 1, Ready::READ)
	}

	/// Expires timer `id`; one-shot timers are released before the callback.
	pub fn fire_timer_with(&self, id: u64, expirations: u64, ready: Ready) -> bool {
		let taken = {
			let mut timers = self.timers.borrow_mut();
			match timers.get(&id).map(|t| t.repeat.is_some()) {
				Some(true) => timers.get_mut(&id).and_then(|t| t.callback.take()),
				Some(false) => timers.remove(&id).and_then(|mut t| t.callback.take()),
				None => None,
			}
		};
		let Some(mut callback) = taken else {
			return false;
		};
		callback(expirations, ready);
		let leftover = {
			let mut timers = self.timers.borrow_mut();
			match timers.get_mut(&id) {
				Some(t) if t.callback.is_none() => {
					t.callback = Some(callback);
					None
				}
				_ => Some(callback),
			}
		};
		drop(leftover);
		true
	}
}

impl Reactor for ManualReactor {
	fn watcher_start(&self, fd: RawFd, interest: Ready, callback: WatcherFn) -> std::io::Result<WatcherId> {
		if self.fail_watchers.get() {
			return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
		}
		if self.watching(fd) {
			return Err(std::io::Error::from_raw_os_error(libc::EEXIST));
		}
		let id = self.next_id();
		self.watchers.borrow_mut().insert(
			id,
			Watch {
				fd,
				interest,
				pending: Ready::EMPTY,
				callback: Some(callback),
			},
		);
		Ok(WatcherId(id))
	}

	fn watcher_stop(&self, id: WatcherId) {
		let removed = self.watchers.borrow_mut().remove(&id.0);
		drop(removed);
	}

	fn watcher_pending_set(&self, id: WatcherId, ready: Ready) {
		if let Some(w) = self.watchers.borrow_mut().get_mut(&id.0) {
			w.pending |= ready;
		}
	}

	fn timer_start(&self, after: Duration, repeat: Option<Duration>, callback: TimerFn) -> std::io::Result<TimerId> {
		let id = self.next_id();
		self.timers.borrow_mut().insert(
			id,
			Timer {
				after,
				repeat,
				callback: Some(callback),
			},
		);
		Ok(TimerId(id))
	}

	fn timer_stop(&self, id: TimerId) {
		let removed = self.timers.borrow_mut().remove(&id.0);
		drop(removed);
	}

	fn run(&self, _until_empty: bool) -> std::io::Result<()> {
		Ok(())
	}

	fn break_loop(&self) {
		self.broken.set(true);
	}
}

/// Connected pair of non-blocking Unix sockets.
pub fn socket_pair(kind: libc::c_int) -> (Socket, Socket) {
	let mut fds = [0; 2];
	let rc = unsafe { libc::socketpair(libc::AF_UNIX, kind, 0, fds.as_mut_ptr()) };
	assert_eq!(rc, 0, "socketpair failed");
	let a = Socket::from_fd(unsafe { OwnedFd::from_raw_fd(fds[0]) }).expect("adopt first");
	let b = Socket::from_fd(unsafe { OwnedFd::from_raw_fd(fds[1]) }).expect("adopt second");
	(a, b)
}

pub fn stream_pair() -> (Socket, Socket) {
	socket_pair(libc::SOCK_STREAM)
}

/// What a scripted session call returns next.
#[derive(Debug, Default)]
pub struct Script {
	pub reads: VecDeque<SessionIo>,
	pub writes: VecDeque<SessionIo>,
	pub read_calls: usize,
	pub write_calls: usize,
	pub shutdowns: usize,
	pub opened: Vec<(RawFd, Method)>,
	pub fail_open: bool,
}

/// Session replaying a [`Script`]; `Done` reads fill the buffer with b'x'.
pub struct ScriptedSession {
	script: Rc<RefCell<Script>>,
}

impl EncryptedSession for ScriptedSession {
	fn read(&mut self, buf: &mut [u8]) -> SessionIo {
		let mut script = self.script.borrow_mut();
		script.read_calls += 1;
		let io = script.reads.pop_front().unwrap_or(SessionIo::WantRead);
		if let SessionIo::Done(n) = io {
			buf[..n].fill(b'x');
		}
		io
	}

	fn write(&mut self, buf: &[u8]) -> SessionIo {
		let mut script = self.script.borrow_mut();
		script.write_calls += 1;
		script.writes.pop_front().unwrap_or(SessionIo::Done(buf.len()))
	}

	fn shutdown(&mut self) {
		self.script.borrow_mut().shutdowns += 1;
	}
}

#[derive(Clone, Default)]
pub struct ScriptedProvider {
	pub script: Rc<RefCell<Script>>,
}

impl SessionProvider for ScriptedProvider {
	fn open(&self, fd: RawFd, method: Method) -> std::io::Result<Box<dyn EncryptedSession>> {
		let mut script = self.script.borrow_mut();
		if script.fail_open {
			return Err(std::io::Error::other("handshake setup failed"));
		}
		script.opened.push((fd, method));
		Ok(Box::new(ScriptedSession { script: self.script.clone() }))
	}
}

/// Session that passes bytes straight through the descriptor.
pub struct PlainSession {
	fd: RawFd,
}

impl EncryptedSession for PlainSession {
	fn read(&mut self, buf: &mut [u8]) -> SessionIo {
		let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
		match n {
			0 => SessionIo::ZeroReturn,
			n if n > 0 => SessionIo::Done(n as usize),
			_ => match std::io::Error::last_os_error().raw_os_error() {
				Some(libc::EAGAIN) => SessionIo::WantRead,
				Some(e) => SessionIo::Failed(e),
				None => SessionIo::Failed(-1),
			},
		}
	}

	fn write(&mut self, buf: &[u8]) -> SessionIo {
		let n = unsafe { libc::send(self.fd, buf.as_ptr() as *const libc::c_void, buf.len(), libc::MSG_NOSIGNAL) };
		if n >= 0 {
			return SessionIo::Done(n as usize);
		}
		match std::io::Error::last_os_error().raw_os_error() {
			Some(libc::EAGAIN) => SessionIo::WantWrite,
			Some(e) => SessionIo::Failed(e),
			None => SessionIo::Failed(-1),
		}
	}

	fn shutdown(&mut self) {}
}

pub struct PlainProvider;

impl SessionProvider for PlainProvider {
	fn open(&self, fd: RawFd, _method: Method) -> std::io::Result<Box<dyn EncryptedSession>> {
		Ok(Box::new(PlainSession { fd }))
	}
}
