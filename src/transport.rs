//! Transport adapter over stream and datagram sockets.
//!
//! Presents a uniform dial/listen/bind surface to the orchestrators.
//! SCTP is treated exactly like TCP here: the crate does not speak any
//! SCTP-specific socket API, it runs the byte-stream data plane over
//! whatever reliable stream the platform hands back for the address.

use crate::config::Config;
use crate::error::{Error, Result};
use log::debug;
use socket2::SockRef;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Applies the configured socket buffer size to any socket.
fn apply_window<'a, S>(socket: &'a S, window: Option<usize>) -> Result<()>
where
    SockRef<'a>: From<&'a S>,
{
    if let Some(bytes) = window {
        let sock = SockRef::from(socket);
        sock.set_send_buffer_size(bytes)?;
        sock.set_recv_buffer_size(bytes)?;
        debug!("socket buffers set to {} bytes", bytes);
    }
    Ok(())
}

/// Dials a stream connection (TCP or SCTP-as-TCP) to the server.
pub async fn dial_stream(config: &Config) -> Result<TcpStream> {
    let host = config
        .server_addr
        .as_deref()
        .ok_or_else(|| Error::Config("client mode requires a server address".into()))?;
    let addr = format!("{}:{}", host, config.port);

    let stream = TcpStream::connect(&addr).await?;
    stream.set_nodelay(true)?;
    apply_window(&stream, config.window)?;
    debug!("connected to {}", addr);
    Ok(stream)
}

/// Binds the stream listener for the server role.
pub async fn listen_stream(config: &Config) -> Result<TcpListener> {
    let listener = TcpListener::bind(bind_addr(config)).await?;
    Ok(listener)
}

/// Tunes an accepted stream connection.
pub fn configure_accepted(stream: &TcpStream, config: &Config) -> Result<()> {
    stream.set_nodelay(true)?;
    apply_window(stream, config.window)
}

/// Binds and connects the client-side datagram socket.
pub async fn dial_datagram(config: &Config) -> Result<UdpSocket> {
    let host = config
        .server_addr
        .as_deref()
        .ok_or_else(|| Error::Config("client mode requires a server address".into()))?;
    let addr = format!("{}:{}", host, config.port);

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    apply_window(&socket, config.window)?;
    socket.connect(&addr).await?;
    debug!("datagram socket connected to {}", addr);
    Ok(socket)
}

/// Binds the server-side datagram socket.
pub async fn bind_datagram(config: &Config) -> Result<UdpSocket> {
    let socket = UdpSocket::bind(bind_addr(config)).await?;
    apply_window(&socket, config.window)?;
    Ok(socket)
}

/// Listen address from the bind flag and port.
pub fn bind_addr(config: &Config) -> SocketAddr {
    let ip = config
        .bind_addr
        .unwrap_or_else(|| "0.0.0.0".parse().expect("wildcard address"));
    SocketAddr::new(ip, config.port)
}
