use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;
use log::{trace, warn};
use crate::error::errno;
use super::{Reactor, Ready, TimerFn, TimerId, WatcherFn, WatcherId};

/// Timer tokens carry this bit so one epoll set serves both kinds.
const TIMER_FLAG: u64 = 1 << 63;

/// Events fetched per `epoll_wait`.
const MAX_EVENTS: usize = 64;

struct Watcher {
	fd: RawFd,
	interest: Ready,
	pending: Ready,
	/// `None` while the callback is running.
	callback: Option<WatcherFn>,
}

struct Timer {
	fd: OwnedFd,
	repeating: bool,
	callback: Option<TimerFn>,
}

#[derive(Default)]
struct Registry {
	next: u64,
	watchers: HashMap<u64, Watcher>,
	timers: HashMap<u64, Timer>,
}

impl Registry {
	fn next_id(&mut self) -> u64 {
		self.next += 1;
		self.next
	}
}

enum Dispatch {
	Watcher(u64, Ready),
	Timer(u64),
}

/// epoll + timerfd reactor.
///
/// I/O watchers are edge-triggered. Each timer owns a timerfd in the same
/// epoll set. Callbacks are taken out of the registry while they run so
/// they may freely register, stop or re-arm anything, themselves included.
///
/// # Example
/// ```ignore
/// use std::rc::Rc;
/// use std::time::Duration;
/// use wirelink::{EventLoop, Reactor};
///
/// let reactor = Rc::new(EventLoop::new()?);
/// reactor.timer_start(Duration::from_millis(10), None, Box::new(|_, _| println!("tick")))?;
/// reactor.run(true)?;
/// ```
pub struct EventLoop {
	epoll: OwnedFd,
	registry: RefCell<Registry>,
	stopped: Cell<bool>,
}

impl EventLoop {
	pub fn new() -> std::io::Result<Self> {
		let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
		if fd == -1 {
			return Err(std::io::Error::from_raw_os_error(errno()));
		}
		Ok(Self {
			epoll: unsafe { OwnedFd::from_raw_fd(fd) },
			registry: RefCell::new(Registry::default()),
			stopped: Cell::new(false),
		})
	}

	/// True when no watcher or timer is registered.
	pub fn is_empty(&self) -> bool {
		let registry = self.registry.borrow();
		registry.watchers.is_empty() && registry.timers.is_empty()
	}

	fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> std::io::Result<()> {
		let mut event = libc::epoll_event { events, u64: token };
		if unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) } == -1 {
			return Err(std::io::Error::from_raw_os_error(errno()));
		}
		Ok(())
	}

	/// Waits at most `timeout` (forever when `None`) and dispatches what
	/// fired. Returns the number of callbacks invoked.
	///
	/// Pending readiness makes the wait non-blocking.
	pub fn run_once(&self, timeout: Option<Duration>) -> std::io::Result<usize> {
		let has_pending = self.registry.borrow().watchers.values().any(|w| !w.pending.is_empty());
		let timeout_ms = match (has_pending, timeout) {
			(true, _) => 0,
			(false, None) => -1,
			(false, Some(t)) => {
				// round up so a 100µs wait does not spin
				let ms = t.as_nanos().div_ceil(1_000_000);
				ms.min(i32::MAX as u128) as libc::c_int
			}
		};

		let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
		let n = unsafe {
			libc::epoll_wait(self.epoll.as_raw_fd(), events.as_mut_ptr(), MAX_EVENTS as libc::c_int, timeout_ms)
		};
		let n = if n == -1 {
			match errno() {
				libc::EINTR => 0,
				e => return Err(std::io::Error::from_raw_os_error(e)),
			}
		} else {
			n as usize
		};

		let mut batch = Vec::with_capacity(n);
		{
			let mut registry = self.registry.borrow_mut();
			for event in &events[..n] {
				let token = event.u64;
				let bits = event.events;
				if token & TIMER_FLAG != 0 {
					batch.push(Dispatch::Timer(token & !TIMER_FLAG));
				} else if let Some(watcher) = registry.watchers.get_mut(&token) {
					let ready = ready_from(bits) | std::mem::take(&mut watcher.pending);
					batch.push(Dispatch::Watcher(token, ready));
				}
			}
			for (&id, watcher) in registry.watchers.iter_mut() {
				if !watcher.pending.is_empty() {
					batch.push(Dispatch::Watcher(id, std::mem::take(&mut watcher.pending)));
				}
			}
		}

		let mut invoked = 0;
		for item in batch {
			let fired = match item {
				Dispatch::Watcher(id, ready) => self.dispatch_watcher(id, ready),
				Dispatch::Timer(id) => self.dispatch_timer(id),
			};
			if fired {
				invoked += 1;
			}
		}
		Ok(invoked)
	}

	fn dispatch_watcher(&self, id: u64, ready: Ready) -> bool {
		let taken = {
			let mut registry = self.registry.borrow_mut();
			match registry.watchers.get_mut(&id) {
				Some(watcher) => {
					let mask = Ready(ready.bits() & (watcher.interest | Ready::ERROR | Ready::HUP).bits());
					watcher.callback.take().map(|cb| (cb, mask))
				}
				None => None,
			}
		};
		let Some((mut callback, mask)) = taken else {
			return false;
		};
		if mask.is_empty() {
			self.restore_watcher(id, callback);
			return false;
		}

		trace!("watcher {} fired {:?}", id, mask);
		callback(mask);
		self.restore_watcher(id, callback);
		true
	}

	fn restore_watcher(&self, id: u64, callback: WatcherFn) {
		let leftover = {
			let mut registry = self.registry.borrow_mut();
			match registry.watchers.get_mut(&id) {
				Some(watcher) if watcher.callback.is_none() => {
					watcher.callback = Some(callback);
					None
				}
				_ => Some(callback),
			}
		};
		// stopped while running; drop outside the borrow
		drop(leftover);
	}

	fn dispatch_timer(&self, id: u64) -> bool {
		let taken = {
			let mut registry = self.registry.borrow_mut();
			let expirations = match registry.timers.get(&id) {
				Some(timer) => read_expirations(timer.fd.as_raw_fd()),
				None => return false,
			};
			if expirations == 0 {
				return false;
			}
			let repeating = registry.timers.get(&id).is_some_and(|t| t.repeating);
			if repeating {
				registry
					.timers
					.get_mut(&id)
					.and_then(|t| t.callback.take())
					.map(|cb| (cb, expirations, None))
			} else {
				registry
					.timers
					.remove(&id)
					.and_then(|mut t| t.callback.take().map(|cb| (cb, expirations, Some(t))))
			}
		};
		let Some((mut callback, expirations, released)) = taken else {
			return false;
		};
		if let Some(timer) = released {
			self.deregister(timer.fd.as_raw_fd());
			drop(timer);
		}

		trace!("timer {} fired x{}", id, expirations);
		callback(expirations, Ready::READ);

		let leftover = {
			let mut registry = self.registry.borrow_mut();
			match registry.timers.get_mut(&id) {
				Some(timer) if timer.callback.is_none() => {
					timer.callback = Some(callback);
					None
				}
				_ => Some(callback),
			}
		};
		drop(leftover);
		true
	}

	fn deregister(&self, fd: RawFd) {
		if let Err(e) = self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0) {
			warn!("epoll_ctl(DEL, fd={}) failed: {}", fd, e);
		}
	}
}

impl Reactor for EventLoop {
	fn watcher_start(&self, fd: RawFd, interest: Ready, callback: WatcherFn) -> std::io::Result<WatcherId> {
		let id = self.registry.borrow_mut().next_id();
		self.ctl(libc::EPOLL_CTL_ADD, fd, epoll_events(interest), id)?;
		self.registry.borrow_mut().watchers.insert(
			id,
			Watcher {
				fd,
				interest,
				pending: Ready::EMPTY,
				callback: Some(callback),
			},
		);
		trace!("watcher {} started on fd={} {:?}", id, fd, interest);
		Ok(WatcherId(id))
	}

	fn watcher_stop(&self, id: WatcherId) {
		let removed = self.registry.borrow_mut().watchers.remove(&id.0);
		if let Some(watcher) = removed {
			self.deregister(watcher.fd);
			trace!("watcher {} stopped", id.0);
		}
	}

	fn watcher_pending_set(&self, id: WatcherId, ready: Ready) {
		if let Some(watcher) = self.registry.borrow_mut().watchers.get_mut(&id.0) {
			watcher.pending |= ready;
		}
	}

	fn timer_start(&self, after: Duration, repeat: Option<Duration>, callback: TimerFn) -> std::io::Result<TimerId> {
		let fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC) };
		if fd == -1 {
			return Err(std::io::Error::from_raw_os_error(errno()));
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };

		// a zero it_value would disarm the timer
		let spec = libc::itimerspec {
			it_interval: repeat.map_or(timespec(Duration::ZERO), |r| timespec(r.max(Duration::from_nanos(1)))),
			it_value: timespec(after.max(Duration::from_nanos(1))),
		};
		if unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) } == -1 {
			return Err(std::io::Error::from_raw_os_error(errno()));
		}

		let id = self.registry.borrow_mut().next_id();
		self.ctl(libc::EPOLL_CTL_ADD, fd.as_raw_fd(), (libc::EPOLLIN | libc::EPOLLET) as u32, id | TIMER_FLAG)?;
		self.registry.borrow_mut().timers.insert(
			id,
			Timer {
				fd,
				repeating: repeat.is_some(),
				callback: Some(callback),
			},
		);
		trace!("timer {} armed after {:?} repeat {:?}", id, after, repeat);
		Ok(TimerId(id))
	}

	fn timer_stop(&self, id: TimerId) {
		let removed = self.registry.borrow_mut().timers.remove(&id.0);
		if let Some(timer) = removed {
			self.deregister(timer.fd.as_raw_fd());
			trace!("timer {} stopped", id.0);
		}
	}

	fn run(&self, until_empty: bool) -> std::io::Result<()> {
		// a break requested outside of a run does not carry over
		self.stopped.set(false);
		let result = loop {
			if self.stopped.get() || (until_empty && self.is_empty()) {
				break Ok(());
			}
			if let Err(e) = self.run_once(None) {
				break Err(e);
			}
		};
		self.stopped.set(false);
		result
	}

	fn break_loop(&self) {
		self.stopped.set(true);
	}
}

fn epoll_events(interest: Ready) -> u32 {
	let mut events = libc::EPOLLET as u32;
	if interest.is_readable() {
		events |= (libc::EPOLLIN | libc::EPOLLRDHUP) as u32;
	}
	if interest.is_writable() {
		events |= libc::EPOLLOUT as u32;
	}
	events
}

fn ready_from(events: u32) -> Ready {
	let mut ready = Ready::EMPTY;
	if events & (libc::EPOLLIN | libc::EPOLLRDHUP) as u32 != 0 {
		ready |= Ready::READ;
	}
	if events & libc::EPOLLOUT as u32 != 0 {
		ready |= Ready::WRITE;
	}
	if events & libc::EPOLLERR as u32 != 0 {
		ready |= Ready::ERROR;
	}
	if events & libc::EPOLLHUP as u32 != 0 {
		ready |= Ready::HUP;
	}
	ready
}

fn timespec(d: Duration) -> libc::timespec {
	libc::timespec {
		tv_sec: d.as_secs() as libc::time_t,
		tv_nsec: d.subsec_nanos() as libc::c_long,
	}
}

/// Drains a timerfd; 0 when nothing expired yet.
fn read_expirations(fd: RawFd) -> u64 {
	let mut buf = [0u8; 8];
	let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
	if n == 8 { u64::from_ne_bytes(buf) } else { 0 }
}

/*
 ---
  Dispatch of one iteration:
  ┌──────────────────────┬──────────────────────────────────────────────┐
  │        Source        │                   Handling                   │
  ├──────────────────────┼──────────────────────────────────────────────┤
  │ epoll watcher event  │ kernel mask | pending mask, filtered by the  │
  │                      │ interest (ERROR / HUP always pass)           │
  ├──────────────────────┼──────────────────────────────────────────────┤
  │ pending only         │ delivered without a new kernel edge          │
  ├──────────────────────┼──────────────────────────────────────────────┤
  │ timerfd              │ expirations read, one-shot released first    │
  └──────────────────────┴──────────────────────────────────────────────┘
 ---
*/
