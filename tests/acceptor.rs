mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use common::ManualReactor;
use wirelink::{Acceptor, AcceptorConfig, ConnectionConfig, ErrorKind, Family, Lifecycle, Ready, ReuseConfig, Server,
			   SockAddr, SockKind, Socket, Status};

fn loopback() -> SockAddr {
	SockAddr::ipv4("127.0.0.1", 0).unwrap()
}

fn dial(addr: &SockAddr) -> Socket {
	let mut socket = Socket::new(addr.family(), SockKind::Stream).unwrap();
	let status = socket.connect(addr);
	assert!(matches!(status, Status::Ok(0) | Status::InProgress), "connect: {}", status);
	socket
}

fn keep_servers(acceptor: &Acceptor) -> Rc<RefCell<Vec<Server>>> {
	let servers = Rc::new(RefCell::new(Vec::new()));
	let keep = servers.clone();
	acceptor.on_setup(move |server| {
		keep.borrow_mut().push(server.clone());
		true
	});
	servers
}

#[test]
fn start_listens_and_watches() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	acceptor.start().unwrap();

	assert!(acceptor.is_listening());
	let addr = acceptor.local_addr().unwrap();
	assert_ne!(addr.port(), Some(0));
	assert_eq!(reactor.interest(acceptor.fd()), Some(Ready::READ));
	assert!(acceptor.start().is_err());
}

#[test]
fn readiness_drains_every_pending_connection() {
	let reactor = ManualReactor::new();
	let config = AcceptorConfig::new().connection(ConnectionConfig::new().read_timeout(Duration::from_secs(3)));
	let acceptor = Acceptor::new(reactor.clone(), loopback(), config);
	let servers = keep_servers(&acceptor);
	acceptor.start().unwrap();
	let addr = acceptor.local_addr().unwrap();

	let clients: Vec<Socket> = (0..3).map(|_| dial(&addr)).collect();
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);

	let servers = servers.borrow();
	assert_eq!(servers.len(), 3);
	for server in servers.iter() {
		let conn = server.connection();
		assert_eq!(conn.state(), Lifecycle::Open);
		assert!(reactor.watching(conn.fd()));
		assert_eq!(conn.config().read_timeout, Some(Duration::from_secs(3)));
		assert!(server.acceptor().is_some());
		assert!(clients.iter().any(|c| c.local_addr().cloned() == server.peer_addr()));
	}
}

#[test]
fn servers_exchange_data() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	let servers = keep_servers(&acceptor);
	acceptor.start().unwrap();

	let mut client = dial(&acceptor.local_addr().unwrap());
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);
	let server = servers.borrow()[0].clone();

	let echoed = Rc::new(Cell::new(0));
	let count = echoed.clone();
	server.connection().on_read(move |conn| {
		let mut buf = [0u8; 64];
		while let Status::Ok(n) = conn.read(&mut buf) {
			conn.write(&buf[..n]);
			count.set(count.get() + n);
		}
	});

	assert_eq!(client.write(b"echo me"), Status::Ok(7));
	std::thread::sleep(Duration::from_millis(10));
	reactor.fire(server.connection().fd(), Ready::READ);
	assert_eq!(echoed.get(), 7);

	std::thread::sleep(Duration::from_millis(10));
	let mut buf = [0u8; 16];
	assert_eq!(client.read(&mut buf), Status::Ok(7));
	assert_eq!(&buf[..7], b"echo me");
}

#[test]
fn accept_hook_can_reject() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	let servers = keep_servers(&acceptor);
	let offered = Rc::new(Cell::new(0));
	let count = offered.clone();
	acceptor.on_accept(move |socket| {
		assert!(socket.is_accepted());
		count.set(count.get() + 1);
		false
	});
	acceptor.start().unwrap();

	let mut client = dial(&acceptor.local_addr().unwrap());
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);
	assert_eq!(offered.get(), 1);
	assert!(servers.borrow().is_empty());
	assert_eq!(reactor.watcher_count(), 1);

	// the rejected socket was closed
	std::thread::sleep(Duration::from_millis(10));
	let mut buf = [0u8; 4];
	assert!(matches!(client.read(&mut buf), Status::Close | Status::Error(_)));
}

#[test]
fn setup_hook_can_refuse() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	let refused = Rc::new(RefCell::new(Vec::new()));
	let keep = refused.clone();
	acceptor.on_setup(move |server| {
		keep.borrow_mut().push(server.clone());
		false
	});
	acceptor.start().unwrap();

	let _client = dial(&acceptor.local_addr().unwrap());
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);
	assert_eq!(refused.borrow().len(), 1);
	assert_eq!(refused.borrow()[0].connection().state(), Lifecycle::Freed);
	assert_eq!(reactor.watcher_count(), 1);
}

#[test]
fn unkept_server_is_released() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	acceptor.start().unwrap();

	let _client = dial(&acceptor.local_addr().unwrap());
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);
	assert_eq!(reactor.watcher_count(), 1);
}

#[test]
fn listen_failure_is_reported() {
	let reactor = ManualReactor::new();
	let first = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	first.start().unwrap();
	let taken = first.local_addr().unwrap();

	let config = AcceptorConfig::new().reuse(ReuseConfig::new().addr(false));
	let second = Acceptor::new(reactor.clone(), taken, config);
	let errors = Rc::new(RefCell::new(Vec::new()));
	let sink = errors.clone();
	second.on_error(move |kind| sink.borrow_mut().push(kind));

	let err = second.start().unwrap_err();
	assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
	assert_eq!(*errors.borrow(), vec![ErrorKind::ListenFailed]);
	assert!(!second.is_listening());
	assert_eq!(second.fd(), -1);
	assert_eq!(reactor.watcher_count(), 1);
}

#[test]
fn stop_is_idempotent() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	let stops = Rc::new(Cell::new(0));
	let count = stops.clone();
	acceptor.on_stop(move || count.set(count.get() + 1));
	acceptor.start().unwrap();

	acceptor.stop();
	acceptor.stop();
	assert_eq!(stops.get(), 1);
	assert!(!acceptor.is_listening());
	assert_eq!(acceptor.fd(), -1);
	assert_eq!(reactor.watcher_count(), 0);
}

#[test]
fn servers_outlive_a_stopped_acceptor() {
	let reactor = ManualReactor::new();
	let acceptor = Acceptor::new(reactor.clone(), loopback(), AcceptorConfig::new());
	let servers = keep_servers(&acceptor);
	acceptor.start().unwrap();
	let _client = dial(&acceptor.local_addr().unwrap());
	std::thread::sleep(Duration::from_millis(20));
	reactor.fire(acceptor.fd(), Ready::READ);

	acceptor.stop();
	drop(acceptor);
	let server = servers.borrow()[0].clone();
	assert_eq!(server.connection().state(), Lifecycle::Open);
	assert!(server.acceptor().is_none());
}

#[test]
fn unix_acceptor_removes_its_socket_file() {
	let reactor = ManualReactor::new();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("acceptor.sock");
	let addr = SockAddr::unix(path.as_os_str().as_encoded_bytes()).unwrap();
	let acceptor = Acceptor::new(reactor.clone(), addr.clone(), AcceptorConfig::new());
	let servers = keep_servers(&acceptor);
	acceptor.start().unwrap();
	assert!(path.exists());
	assert_eq!(acceptor.local_addr().map(|a| a.family()), Some(Family::Unix));

	let _client = dial(&addr);
	reactor.fire(acceptor.fd(), Ready::READ);
	assert_eq!(servers.borrow().len(), 1);

	acceptor.stop();
	assert!(!path.exists());
}

#[test]
fn stop_survives_an_unremovable_socket_path() {
	let reactor = ManualReactor::new();
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("replaced.sock");
	let addr = SockAddr::unix(path.as_os_str().as_encoded_bytes()).unwrap();
	let acceptor = Acceptor::new(reactor.clone(), addr, AcceptorConfig::new());
	let stops = Rc::new(Cell::new(0));
	let count = stops.clone();
	acceptor.on_stop(move || count.set(count.get() + 1));
	acceptor.start().unwrap();

	// something else now lives at the path
	std::fs::remove_file(&path).unwrap();
	std::fs::create_dir(&path).unwrap();
	std::fs::write(path.join("keep"), b"x").unwrap();

	acceptor.stop();
	assert_eq!(stops.get(), 1);
	assert!(!acceptor.is_listening());
	assert_eq!(reactor.watcher_count(), 0);
	assert!(path.join("keep").exists());
}
