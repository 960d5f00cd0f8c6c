//! Readiness reactor interface.
//!
//! Everything above the socket layer is driven by one single-threaded
//! reactor: edge-triggered I/O watchers plus one-shot or repeating timers.
//! Connections only ever see the [`Reactor`] trait, so tests can drive
//! them by hand. [`EventLoop`] is the epoll + timerfd implementation.

mod epoll;

pub use self::epoll::EventLoop;

use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::time::Duration;

/// Readiness mask handed to watcher and timer callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ready(u32);

impl Ready {
	pub const EMPTY: Ready = Ready(0);
	pub const READ: Ready = Ready(1);
	pub const WRITE: Ready = Ready(1 << 1);
	pub const ERROR: Ready = Ready(1 << 2);
	pub const HUP: Ready = Ready(1 << 3);

	#[inline]
	pub fn bits(self) -> u32 {
		self.0
	}

	#[inline]
	pub fn contains(self, other: Ready) -> bool {
		self.0 & other.0 == other.0 && other.0 != 0
	}

	#[inline]
	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	#[inline]
	pub fn is_readable(self) -> bool {
		self.contains(Ready::READ)
	}

	#[inline]
	pub fn is_writable(self) -> bool {
		self.contains(Ready::WRITE)
	}

	#[inline]
	pub fn is_error(self) -> bool {
		self.contains(Ready::ERROR)
	}

	#[inline]
	pub fn is_hup(self) -> bool {
		self.contains(Ready::HUP)
	}
}

impl BitOr for Ready {
	type Output = Ready;

	fn bitor(self, rhs: Ready) -> Ready {
		Ready(self.0 | rhs.0)
	}
}

impl BitOrAssign for Ready {
	fn bitor_assign(&mut self, rhs: Ready) {
		self.0 |= rhs.0;
	}
}

/// Handle of a registered I/O watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub u64);

/// Handle of an armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Called with the readiness that fired.
pub type WatcherFn = Box<dyn FnMut(Ready)>;

/// Called with the expiration count and a readiness mask (READ when the
/// timer really expired).
pub type TimerFn = Box<dyn FnMut(u64, Ready)>;

/// Single-threaded readiness reactor.
///
/// Callbacks may start and stop watchers and timers, including the one
/// being dispatched. Stopping an unknown id does nothing.
pub trait Reactor {
	/// Registers `fd` for edge-triggered readiness in `interest`.
	fn watcher_start(&self, fd: RawFd, interest: Ready, callback: WatcherFn) -> std::io::Result<WatcherId>;

	fn watcher_stop(&self, id: WatcherId);

	/// Marks readiness as pending so it is delivered again on the next
	/// iteration even though the kernel will not report a new edge.
	fn watcher_pending_set(&self, id: WatcherId, ready: Ready);

	/// Arms a timer firing once after `after`, then every `repeat` if set.
	/// One-shot timers are released when they fire.
	fn timer_start(&self, after: Duration, repeat: Option<Duration>, callback: TimerFn) -> std::io::Result<TimerId>;

	fn timer_stop(&self, id: TimerId);

	/// Dispatches events until `break_loop` is called, or until nothing is
	/// registered when `until_empty` is set.
	fn run(&self, until_empty: bool) -> std::io::Result<()>;

	/// Makes the running `run` return. Outside of a run this has no effect.
	fn break_loop(&self);
}
