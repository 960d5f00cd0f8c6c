//! Encrypted variants of the client, server and acceptor.
//!
//! The TLS library itself stays behind [`SessionProvider`] and
//! [`EncryptedSession`]; [`TlsTransport`] adapts a session to the
//! connection's read/write protocol.

mod session;
mod transport;

pub use self::session::{EncryptedSession, Method, SessionIo, SessionProvider};
pub use self::transport::TlsTransport;

use std::rc::Rc;
use crate::addr::SockAddr;
use crate::config::{AcceptorConfig, ClientConfig};
use crate::conn::{Acceptor, Client, Connection, Server};
use crate::reactor::Reactor;
use crate::socket::Socket;

pub type TlsClient = Client<TlsTransport>;
pub type TlsServer = Server<TlsTransport>;
pub type TlsAcceptor = Acceptor<TlsTransport>;
pub type TlsConnection = Connection<TlsTransport>;

impl Client<TlsTransport> {
	/// Client whose connection is encrypted once the connect completes.
	///
	/// Datagram configs get DTLS.
	pub fn tls(reactor: Rc<dyn Reactor>, remote: SockAddr, config: ClientConfig, provider: Rc<dyn SessionProvider>) -> Self {
		let transport = TlsTransport::new(Socket::closed(config.kind), provider);
		Client::with_transport(reactor, remote, config, transport)
	}
}

impl Acceptor<TlsTransport> {
	/// Acceptor opening a server session on every accepted socket.
	pub fn tls(reactor: Rc<dyn Reactor>, addr: SockAddr, config: AcceptorConfig, provider: Rc<dyn SessionProvider>) -> Self {
		Acceptor::with_factory(reactor, addr, config, move |socket| TlsTransport::new(socket, provider.clone()))
	}
}
