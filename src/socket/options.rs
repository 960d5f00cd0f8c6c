use std::os::fd::AsRawFd;
use crate::error::{SocketError, errno};

/// setsockopt with an int payload.
fn set_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	val: libc::c_int,
	option: &'static str,
) -> std::io::Result<()> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::c_int>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option }.into())
	} else {
		Ok(())
	}
}

/// getsockopt with an int payload.
fn get_int<S: AsRawFd>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	option: &'static str,
) -> std::io::Result<libc::c_int> {
	let mut val: libc::c_int = 0;
	let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
	let result = unsafe {
		libc::getsockopt(
			socket.as_raw_fd(),
			level,
			name,
			&mut val as *mut _ as *mut libc::c_void,
			&mut len,
		)
	};
	if result == -1 {
		Err(SocketError::GetOption { errno: errno(), option }.into())
	} else {
		Ok(val)
	}
}

/// Sets SO_REUSEADDR on a socket.
///
/// Allows binding to an address that's in TIME_WAIT state.
/// Essential for server restarts.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, enable as libc::c_int, "SO_REUSEADDR")
}

/// Sets SO_REUSEPORT on a socket.
///
/// Allows multiple sockets to bind the same port.
pub fn set_reuse_port<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_REUSEPORT, enable as libc::c_int, "SO_REUSEPORT")
}

/// Sets TCP_NODELAY on a socket.
///
/// Disables Nagle's algorithm so small writes go out immediately.
pub fn set_tcp_nodelay<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, enable as libc::c_int, "TCP_NODELAY")
}

/// Sets receive buffer size (SO_RCVBUF).
///
/// Kernel typically doubles this value internally.
pub fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> std::io::Result<()> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, size as libc::c_int, "SO_RCVBUF")
}

/// Sets send buffer size (SO_SNDBUF).
pub fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> std::io::Result<()> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, size as libc::c_int, "SO_SNDBUF")
}

/// Enables TCP keep-alive (SO_KEEPALIVE).
///
/// When enabled, the kernel sends probes on idle connections to detect dead peers.
/// Use with TCP_KEEPIDLE, TCP_KEEPINTVL, TCP_KEEPCNT to tune timing.
pub fn set_keepalive<S: AsRawFd>(socket: &S, enable: bool) -> std::io::Result<()> {
	set_int(socket, libc::SOL_SOCKET, libc::SO_KEEPALIVE, enable as libc::c_int, "SO_KEEPALIVE")
}

/// Seconds of idle time before the first keep-alive probe (TCP_KEEPIDLE).
pub fn set_keepalive_idle<S: AsRawFd>(socket: &S, seconds: u32) -> std::io::Result<()> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, seconds as libc::c_int, "TCP_KEEPIDLE")
}

/// Seconds between unanswered keep-alive probes (TCP_KEEPINTVL).
pub fn set_keepalive_interval<S: AsRawFd>(socket: &S, seconds: u32) -> std::io::Result<()> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, seconds as libc::c_int, "TCP_KEEPINTVL")
}

/// Unanswered probes before the peer is declared dead (TCP_KEEPCNT).
///
/// Total detection time = KEEPIDLE + (KEEPINTVL × KEEPCNT).
pub fn set_keepalive_count<S: AsRawFd>(socket: &S, count: u32) -> std::io::Result<()> {
	set_int(socket, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, count as libc::c_int, "TCP_KEEPCNT")
}

/// Sets socket linger behavior (SO_LINGER).
///
/// - `None`: default behavior, close returns immediately, kernel sends data in background
/// - `Some(0)`: hard reset (RST), discards unsent data, no TIME_WAIT
/// - `Some(n)`: close blocks up to n seconds waiting for data to send
pub fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> std::io::Result<()> {
	let val = match linger {
		None => libc::linger { l_onoff: 0, l_linger: 0 },
		Some(seconds) => libc::linger {
			l_onoff: 1,
			l_linger: seconds as libc::c_int,
		},
	};
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			libc::SOL_SOCKET,
			libc::SO_LINGER,
			&val as *const _ as *const libc::c_void,
			std::mem::size_of::<libc::linger>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option: "SO_LINGER" }.into())
	} else {
		Ok(())
	}
}

/// Reads and clears the pending socket error (SO_ERROR).
///
/// Zero means no error. After a non-blocking connect signals writability
/// this is what tells success from failure; reading clears it.
pub fn socket_error<S: AsRawFd>(socket: &S) -> std::io::Result<i32> {
	get_int(socket, libc::SOL_SOCKET, libc::SO_ERROR, "SO_ERROR")
}

/// Socket type as the kernel sees it (SO_TYPE).
pub fn socket_type<S: AsRawFd>(socket: &S) -> std::io::Result<libc::c_int> {
	get_int(socket, libc::SOL_SOCKET, libc::SO_TYPE, "SO_TYPE")
}

/// Forces O_NONBLOCK and FD_CLOEXEC on, whatever the descriptor had before.
pub(crate) fn set_nonblocking_cloexec(fd: libc::c_int) -> std::io::Result<()> {
	let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
	if flags == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "F_GETFL" }.into());
	}
	if flags & libc::O_NONBLOCK == 0 && unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
		return Err(SocketError::SetOption { errno: errno(), option: "O_NONBLOCK" }.into());
	}

	let fd_flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
	if fd_flags == -1 {
		return Err(SocketError::GetOption { errno: errno(), option: "F_GETFD" }.into());
	}
	if fd_flags & libc::FD_CLOEXEC == 0 && unsafe { libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) } == -1 {
		return Err(SocketError::SetOption { errno: errno(), option: "FD_CLOEXEC" }.into());
	}
	Ok(())
}
