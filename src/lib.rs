pub mod addr;
pub mod config;
pub mod conn;
pub mod error;
pub mod hashset;
pub mod reactor;
pub mod socket;
pub mod tls;

pub use self::error::{ErrorKind, SocketError, Status, errno};
pub use self::addr::{Family, LinkAddr, SockAddr, SocketAddrV4, SocketAddrV6, UnixAddr};
pub use self::socket::{SockKind, Socket,
					   set_reuse_addr, set_reuse_port, set_tcp_nodelay, set_linger,
					   set_recv_buffer_size, set_send_buffer_size,
					   set_keepalive, set_keepalive_idle, set_keepalive_interval, set_keepalive_count,
					   socket_error, socket_type};
pub use self::config::{AcceptorConfig, BufferConfig, ClientConfig, ConnectionConfig,
					   KeepaliveConfig, ReuseConfig, TcpConfig};
pub use self::reactor::{EventLoop, Reactor, Ready, TimerFn, TimerId, WatcherFn, WatcherId};
pub use self::conn::{Acceptor, Client, Connection, Endpoint, Lifecycle, Phase, Role, Server,
					 Transport, UdpServer};
pub use self::tls::{EncryptedSession, Method, SessionIo, SessionProvider, TlsAcceptor, TlsClient,
					TlsConnection, TlsServer, TlsTransport};
pub use self::hashset::OpenSet;
