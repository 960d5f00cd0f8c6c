mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use common::{ManualReactor, stream_pair};
use wirelink::{Connection, ConnectionConfig, ErrorKind, Lifecycle, Ready, Socket, Status};

type Log = Rc<RefCell<Vec<String>>>;

fn record_close(conn: &Connection, log: &Log) {
	let on_error = log.clone();
	conn.on_error(move |_, kind| on_error.borrow_mut().push(format!("error {:?}", kind)));
	let on_close = log.clone();
	conn.on_close(move |_, kind| on_close.borrow_mut().push(format!("close {:?}", kind)));
}

fn started(reactor: &Rc<ManualReactor>, config: ConnectionConfig) -> (Connection, Socket) {
	let (ours, peer) = stream_pair();
	let conn = Connection::with_config(reactor.clone(), ours, config);
	conn.start().unwrap();
	(conn, peer)
}

#[test]
fn start_watches_read_and_write() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	assert_eq!(conn.state(), Lifecycle::Open);
	assert!(conn.is_watching());
	assert_eq!(reactor.interest(conn.fd()), Some(Ready::READ | Ready::WRITE));

	assert!(conn.start().is_err());
	assert_eq!(reactor.watcher_count(), 1);
}

#[test]
fn failed_registration_leaves_connection_created() {
	let reactor = ManualReactor::new();
	reactor.fail_watchers.set(true);
	let (ours, _peer) = stream_pair();
	let conn = Connection::new(reactor.clone(), ours);
	assert!(conn.start().is_err());
	assert_eq!(conn.state(), Lifecycle::Created);
	assert!(conn.fd() >= 0);

	reactor.fail_watchers.set(false);
	conn.start().unwrap();
	assert_eq!(conn.state(), Lifecycle::Open);
}

#[test]
fn io_before_start_does_nothing() {
	let reactor = ManualReactor::new();
	let (ours, mut peer) = stream_pair();
	let conn = Connection::new(reactor.clone(), ours);
	assert_eq!(peer.write(b"abc"), Status::Ok(3));
	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::None);
	assert_eq!(conn.write(b"x"), Status::None);
}

#[test]
fn read_hook_receives_data() {
	let reactor = ManualReactor::new();
	let (conn, mut peer) = started(&reactor, ConnectionConfig::new());
	let received = Rc::new(RefCell::new(Vec::new()));

	let sink = received.clone();
	conn.on_read(move |conn| {
		let mut buf = [0u8; 64];
		while let Status::Ok(n) = conn.read(&mut buf) {
			sink.borrow_mut().extend_from_slice(&buf[..n]);
		}
	});

	assert_eq!(peer.write(b"hello world"), Status::Ok(11));
	assert!(reactor.fire(conn.fd(), Ready::READ));
	assert_eq!(&*received.borrow(), b"hello world");
	assert_eq!(conn.state(), Lifecycle::Open);
}

#[test]
fn successful_io_requeues_its_direction() {
	let reactor = ManualReactor::new();
	let (conn, mut peer) = started(&reactor, ConnectionConfig::new());

	assert_eq!(conn.write(b"ping"), Status::Ok(4));
	assert_eq!(reactor.pending(conn.fd()), Ready::WRITE);

	assert_eq!(peer.write(b"pong"), Status::Ok(4));
	let mut buf = [0u8; 4];
	assert_eq!(conn.read(&mut buf), Status::Ok(4));
	assert_eq!(reactor.pending(conn.fd()), Ready::READ | Ready::WRITE);
}

#[test]
fn would_block_arms_timer_only_with_timeout() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	assert!(!conn.is_read_timer_armed());
	assert_eq!(reactor.timer_count(), 0);

	let timeout = Duration::from_millis(50);
	conn.set_config(ConnectionConfig::new().read_timeout(timeout));
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	assert!(conn.is_read_timer_armed());
	let timers = reactor.timers();
	assert_eq!(timers.len(), 1);
	assert_eq!((timers[0].1, timers[0].2), (timeout, Some(timeout)));

	// already armed: no second timer
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	assert_eq!(reactor.timer_count(), 1);
}

#[test]
fn successful_read_disarms_read_timer() {
	let reactor = ManualReactor::new();
	let config = ConnectionConfig::new().read_timeout(Duration::from_millis(50));
	let (conn, mut peer) = started(&reactor, config);
	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	assert!(conn.is_read_timer_armed());

	assert_eq!(peer.write(b"a"), Status::Ok(1));
	assert_eq!(conn.read(&mut buf), Status::Ok(1));
	assert!(!conn.is_read_timer_armed());
	assert_eq!(reactor.timer_count(), 0);
}

#[test]
fn read_timeout_closes() {
	let reactor = ManualReactor::new();
	let config = ConnectionConfig::new().read_timeout(Duration::from_millis(50));
	let (conn, _peer) = started(&reactor, config);
	let log: Log = Rc::default();
	record_close(&conn, &log);

	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	let timer = reactor.timers()[0].0;
	assert!(reactor.fire_timer(timer));

	assert_eq!(conn.state(), Lifecycle::Closed);
	assert_eq!(conn.fd(), -1);
	assert!(!conn.is_watching());
	assert_eq!(reactor.watcher_count(), 0);
	assert_eq!(reactor.timer_count(), 0);
	assert_eq!(*log.borrow(), vec!["error ReadTimeout", "close Some(ReadTimeout)"]);
}

#[test]
fn timeout_hook_can_keep_the_connection() {
	let reactor = ManualReactor::new();
	let config = ConnectionConfig::new().write_timeout(Duration::from_millis(20));
	let (conn, _peer) = started(&reactor, config);
	let log: Log = Rc::default();
	record_close(&conn, &log);
	let vetoes = Rc::new(Cell::new(0));
	let count = vetoes.clone();
	conn.on_write_timeout(move |_| {
		count.set(count.get() + 1);
		true
	});

	// fill the socket buffer until the write side blocks
	let chunk = [7u8; 16 * 1024];
	let mut blocked = false;
	for _ in 0..10_000 {
		if conn.write(&chunk) == Status::NotReady {
			blocked = true;
			break;
		}
	}
	assert!(blocked);
	assert!(conn.is_write_timer_armed());

	let timer = reactor.timers()[0].0;
	reactor.fire_timer(timer);
	assert_eq!(vetoes.get(), 1);
	assert_eq!(conn.state(), Lifecycle::Open);
	assert!(!conn.is_write_timer_armed());
	assert!(log.borrow().is_empty());
}

#[test]
fn stale_timer_expiry_is_ignored() {
	let reactor = ManualReactor::new();
	let config = ConnectionConfig::new().read_timeout(Duration::from_millis(50));
	let (conn, _peer) = started(&reactor, config);
	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	let timer = reactor.timers()[0].0;

	reactor.fire_timer_with(timer, 0, Ready::READ);
	assert_eq!(conn.state(), Lifecycle::Open);
	reactor.fire_timer_with(timer, 1, Ready::EMPTY);
	assert_eq!(conn.state(), Lifecycle::Open);
	assert!(conn.is_read_timer_armed());
}

#[test]
fn peer_close_reports_socket_close() {
	let reactor = ManualReactor::new();
	let (conn, peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	record_close(&conn, &log);
	conn.on_read(|conn| {
		let mut buf = [0u8; 16];
		while conn.read(&mut buf).is_ok() {}
	});

	drop(peer);
	reactor.fire(conn.fd(), Ready::READ);
	assert_eq!(conn.state(), Lifecycle::Closed);
	assert_eq!(*log.borrow(), vec!["error SocketClose", "close Some(SocketClose)"]);
}

#[test]
fn error_and_hangup_readiness_close() {
	let reactor = ManualReactor::new();
	for (ready, expected) in [(Ready::ERROR, ErrorKind::SocketError), (Ready::HUP | Ready::READ, ErrorKind::SocketHangUp)] {
		let (conn, _peer) = started(&reactor, ConnectionConfig::new());
		let seen = Rc::new(Cell::new(None));
		let slot = seen.clone();
		conn.on_close(move |_, kind| slot.set(kind));
		let reads = Rc::new(Cell::new(0));
		let counter = reads.clone();
		conn.on_read(move |_| counter.set(counter.get() + 1));

		reactor.fire(conn.fd(), ready);
		assert_eq!(seen.get(), Some(expected));
		assert_eq!(reads.get(), 0);
		assert_eq!(conn.state(), Lifecycle::Closed);
	}
}

#[test]
fn close_from_read_hook_skips_write_hook() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	record_close(&conn, &log);
	let writes = Rc::new(Cell::new(0));
	let counter = writes.clone();
	conn.on_write(move |_| counter.set(counter.get() + 1));
	conn.on_read(|conn| conn.close());

	reactor.fire(conn.fd(), Ready::READ | Ready::WRITE);
	assert_eq!(writes.get(), 0);
	assert_eq!(conn.state(), Lifecycle::Closed);
	assert_eq!(*log.borrow(), vec!["close None"]);
}

#[test]
fn readiness_runs_read_then_write() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	let read_log = log.clone();
	conn.on_read(move |_| read_log.borrow_mut().push("read".into()));
	let write_log = log.clone();
	conn.on_write(move |_| write_log.borrow_mut().push("write".into()));

	reactor.fire(conn.fd(), Ready::WRITE | Ready::READ);
	reactor.fire(conn.fd(), Ready::WRITE);
	assert_eq!(*log.borrow(), vec!["read", "write", "write"]);
}

#[test]
fn hook_may_replace_itself() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();

	let first = log.clone();
	conn.on_read(move |conn| {
		first.borrow_mut().push("first".into());
		let second = first.clone();
		conn.on_read(move |_| second.borrow_mut().push("second".into()));
	});

	reactor.fire(conn.fd(), Ready::READ);
	reactor.fire(conn.fd(), Ready::READ);
	reactor.fire(conn.fd(), Ready::READ);
	assert_eq!(*log.borrow(), vec!["first", "second", "second"]);
}

#[test]
fn close_is_idempotent_and_hooks_run_once() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	record_close(&conn, &log);

	conn.close();
	conn.close();
	assert_eq!(*log.borrow(), vec!["close None"]);
	assert_eq!(conn.read(&mut [0u8; 4]), Status::None);
}

#[test]
fn close_before_start_is_silent() {
	let reactor = ManualReactor::new();
	let (ours, _peer) = stream_pair();
	let conn = Connection::new(reactor.clone(), ours);
	let log: Log = Rc::default();
	record_close(&conn, &log);

	conn.close();
	assert_eq!(conn.state(), Lifecycle::Closed);
	assert_eq!(conn.fd(), -1);
	assert!(log.borrow().is_empty());
}

#[test]
fn cleanup_inside_close_is_deferred() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	let on_error = log.clone();
	conn.on_error(move |conn, _| {
		conn.cleanup();
		on_error.borrow_mut().push(format!("error in {:?}", conn.state()));
	});
	let on_close = log.clone();
	conn.on_close(move |conn, _| on_close.borrow_mut().push(format!("close in {:?}", conn.state())));

	reactor.fire(conn.fd(), Ready::ERROR);
	assert_eq!(*log.borrow(), vec!["error in Closing", "close in Closed"]);
	assert_eq!(conn.state(), Lifecycle::Freed);
	assert!(conn.start().is_err());
}

#[test]
fn cleanup_from_close_hook_frees_at_once() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let states = Rc::new(RefCell::new(Vec::new()));
	let seen = states.clone();
	conn.on_close(move |conn, _| {
		conn.cleanup();
		seen.borrow_mut().push(conn.state());
	});

	conn.close();
	assert_eq!(*states.borrow(), vec![Lifecycle::Freed]);
	assert_eq!(conn.state(), Lifecycle::Freed);
}

#[test]
fn cleanup_closes_and_frees() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	let log: Log = Rc::default();
	record_close(&conn, &log);
	conn.set_data(Rc::new(42u32));
	assert_eq!(conn.data::<u32>().as_deref(), Some(&42));
	assert!(conn.data::<String>().is_none());

	conn.cleanup();
	assert_eq!(conn.state(), Lifecycle::Freed);
	assert_eq!(*log.borrow(), vec!["close None"]);
	assert!(conn.data::<u32>().is_none());
	assert_eq!(reactor.watcher_count(), 0);

	conn.cleanup();
	assert_eq!(log.borrow().len(), 1);
}

#[test]
fn restart_after_close() {
	let reactor = ManualReactor::new();
	let (conn, _peer) = started(&reactor, ConnectionConfig::new());
	conn.close();
	// the socket is gone, so there is nothing to watch
	assert!(conn.start().is_err());
	assert_eq!(conn.state(), Lifecycle::Closed);

	let (fresh, _other) = stream_pair();
	conn.with_transport(|socket| *socket = fresh);
	conn.start().unwrap();
	assert_eq!(conn.state(), Lifecycle::Open);
}

#[test]
fn dropping_last_handle_releases_registrations() {
	let reactor = ManualReactor::new();
	let config = ConnectionConfig::new().read_timeout(Duration::from_millis(50));
	let (conn, _peer) = started(&reactor, config);
	let mut buf = [0u8; 8];
	assert_eq!(conn.read(&mut buf), Status::NotReady);
	assert_eq!(reactor.watcher_count(), 1);
	assert_eq!(reactor.timer_count(), 1);

	let closes = Rc::new(Cell::new(0));
	let counter = closes.clone();
	conn.on_close(move |_, _| counter.set(counter.get() + 1));
	drop(conn);
	assert_eq!(reactor.watcher_count(), 0);
	assert_eq!(reactor.timer_count(), 0);
	assert_eq!(closes.get(), 0);
}
