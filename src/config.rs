use std::os::fd::AsRawFd;
use std::time::Duration;
use crate::addr::SockAddr;
use crate::socket::{
	SockKind,
	set_reuse_addr, set_reuse_port, set_tcp_nodelay,
	set_recv_buffer_size, set_send_buffer_size,
	set_keepalive, set_keepalive_idle, set_keepalive_interval, set_keepalive_count,
	set_linger,
};

// ============================================================================
// Socket option groups
// ============================================================================

/// Buffer size configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self.send = Some(size);
		self
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S) -> std::io::Result<()> {
		if let Some(size) = self.recv {
			set_recv_buffer_size(socket, size)?;
		}
		if let Some(size) = self.send {
			set_send_buffer_size(socket, size)?;
		}
		Ok(())
	}
}

/// Address reuse configuration.
#[derive(Debug, Clone, Copy)]
pub struct ReuseConfig {
	pub addr: bool,
	pub port: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		Self {
			addr: true,  // Almost always want this for servers
			port: false,
		}
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn addr(mut self, enable: bool) -> Self {
		self.addr = enable;
		self
	}

	pub fn port(mut self, enable: bool) -> Self {
		self.port = enable;
		self
	}

	/// Enable both for load balancing across processes.
	pub fn both(mut self) -> Self {
		self.addr = true;
		self.port = true;
		self
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S) -> std::io::Result<()> {
		if self.addr {
			set_reuse_addr(socket, true)?;
		}
		if self.port {
			set_reuse_port(socket, true)?;
		}
		Ok(())
	}
}

/// TCP-specific configuration. Ignored for Unix and datagram sockets.
#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
	pub nodelay: bool,
	pub keepalive: Option<KeepaliveConfig>,
	pub linger: Option<Option<u32>>,
}

impl Default for TcpConfig {
	fn default() -> Self {
		Self {
			nodelay: true,  // Low latency by default
			keepalive: None,
			linger: None,
		}
	}
}

impl TcpConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn nodelay(mut self, enable: bool) -> Self {
		self.nodelay = enable;
		self
	}

	pub fn keepalive(mut self, config: KeepaliveConfig) -> Self {
		self.keepalive = Some(config);
		self
	}

	pub fn linger(mut self, seconds: Option<u32>) -> Self {
		self.linger = Some(seconds);
		self
	}

	pub(crate) fn apply<S: AsRawFd>(&self, socket: &S, is_tcp: bool) -> std::io::Result<()> {
		if !is_tcp {
			return Ok(());
		}
		if self.nodelay {
			set_tcp_nodelay(socket, true)?;
		}
		if let Some(config) = self.keepalive {
			set_keepalive(socket, true)?;
			set_keepalive_idle(socket, config.idle_secs)?;
			set_keepalive_interval(socket, config.interval_secs)?;
			set_keepalive_count(socket, config.count)?;
		}
		if let Some(linger) = self.linger {
			set_linger(socket, linger)?;
		}
		Ok(())
	}
}

/// Keep-alive timing configuration.
#[derive(Debug, Clone, Copy)]
pub struct KeepaliveConfig {
	pub idle_secs: u32,
	pub interval_secs: u32,
	pub count: u32,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		Self {
			idle_secs: 60,
			interval_secs: 10,
			count: 5,
		}
	}
}

impl KeepaliveConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn idle(mut self, secs: u32) -> Self {
		self.idle_secs = secs;
		self
	}

	pub fn interval(mut self, secs: u32) -> Self {
		self.interval_secs = secs;
		self
	}

	pub fn count(mut self, count: u32) -> Self {
		self.count = count;
		self
	}
}

// ============================================================================
// Connection
// ============================================================================

/// Read/write inactivity timeouts of one connection.
///
/// A timer for a direction is armed when an operation in that direction
/// would block and stopped when it next succeeds. `None` disables it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
	pub read_timeout: Option<Duration>,
	pub write_timeout: Option<Duration>,
}

impl ConnectionConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn read_timeout(mut self, timeout: Duration) -> Self {
		self.read_timeout = Some(timeout);
		self
	}

	pub fn write_timeout(mut self, timeout: Duration) -> Self {
		self.write_timeout = Some(timeout);
		self
	}
}

// ============================================================================
// Client
// ============================================================================

/// How a client connects, and reconnects.
///
/// # Example
/// ```ignore
/// use std::time::Duration;
/// use wirelink::{ClientConfig, ConnectionConfig, TcpConfig};
///
/// let config = ClientConfig::new()
///     .connect_timeout(Duration::from_millis(1000))
///     .reconnect(Duration::from_secs(2))
///     .tcp(TcpConfig::new().nodelay(true))
///     .connection(ConnectionConfig::new().read_timeout(Duration::from_secs(30)));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub kind: SockKind,
	pub connect_timeout: Option<Duration>,
	pub reconnect: Option<Duration>,
	pub local: Option<SockAddr>,
	pub connection: ConnectionConfig,
	pub tcp: TcpConfig,
	pub buffers: BufferConfig,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			kind: SockKind::Stream,
			connect_timeout: Some(Duration::from_secs(5)),
			reconnect: None,
			local: None,
			connection: ConnectionConfig::default(),
			tcp: TcpConfig::default(),
			buffers: BufferConfig::default(),
		}
	}
}

impl ClientConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Datagram client defaults: no connect timeout (connect never waits).
	pub fn datagram() -> Self {
		Self {
			kind: SockKind::Datagram,
			connect_timeout: None,
			..Self::default()
		}
	}

	pub fn kind(mut self, kind: SockKind) -> Self {
		self.kind = kind;
		self
	}

	pub fn connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = Some(timeout);
		self
	}

	pub fn no_connect_timeout(mut self) -> Self {
		self.connect_timeout = None;
		self
	}

	/// Reconnect this long after any close that `stop` did not cause.
	pub fn reconnect(mut self, interval: Duration) -> Self {
		self.reconnect = Some(interval);
		self
	}

	/// Bind to this address before connecting.
	pub fn local(mut self, addr: SockAddr) -> Self {
		self.local = Some(addr);
		self
	}

	pub fn connection(mut self, config: ConnectionConfig) -> Self {
		self.connection = config;
		self
	}

	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}
}

// ============================================================================
// Acceptor
// ============================================================================

/// Listening socket options plus the config every accepted server gets.
///
/// # Example
/// ```ignore
/// use wirelink::{AcceptorConfig, ReuseConfig, TcpConfig, KeepaliveConfig};
///
/// let config = AcceptorConfig::new()
///     .reuse(ReuseConfig::new().both())
///     .tcp(TcpConfig::new()
///         .nodelay(true)
///         .keepalive(KeepaliveConfig::new().idle(60).interval(10).count(5)))
///     .backlog(4096);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AcceptorConfig {
	pub backlog: Option<i32>,
	pub reuse: ReuseConfig,
	pub tcp: TcpConfig,
	pub buffers: BufferConfig,
	pub connection: ConnectionConfig,
}

impl Default for AcceptorConfig {
	fn default() -> Self {
		Self {
			backlog: None,
			reuse: ReuseConfig::default(),
			tcp: TcpConfig::default(),
			buffers: BufferConfig::default(),
			connection: ConnectionConfig::default(),
		}
	}
}

impl AcceptorConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Listen backlog. Default: SOMAXCONN.
	pub fn backlog(mut self, backlog: i32) -> Self {
		self.backlog = Some(backlog);
		self
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	/// Applied to the listening socket and inherited by accepted ones.
	pub fn tcp(mut self, config: TcpConfig) -> Self {
		self.tcp = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	pub fn connection(mut self, config: ConnectionConfig) -> Self {
		self.connection = config;
		self
	}
}
