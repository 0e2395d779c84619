//! Embedded SOCKS5 server driving dynamic tunnels (C2).
//!
//! Grounded on the teacher's `TunnelService::socks5_handshake` /
//! `handle_socks_connection` (`src/services/tunnel_service.rs`), extended
//! to support IPv6 destinations (ATYP `0x04`, which the teacher's version
//! never parses) and to report relayed byte counts through a
//! caller-supplied callback instead of an inline atomic counter, per
//! §4.2.

use crate::error::{EngineError, Result};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCESS: u8 = 0x00;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

/// A duplex byte stream: the shape both a `TcpStream` and an SSH-tunnelled
/// channel satisfy.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncDuplex for T {}

/// Dials a destination through whatever transport backs a tunnel's SSH
/// client. Implemented over `russh`'s `channel_open_direct_tcpip` by the
/// engine; tests can stub it with a plain TCP dial.
#[async_trait::async_trait]
pub trait Socks5Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<Box<dyn AsyncDuplex>>;
}

/// Invoked once at relay teardown with (bytes-from-remote, bytes-to-remote).
pub type TrafficCallback = Box<dyn FnOnce(u64, u64) + Send>;

/// Destination address as parsed from a SOCKS5 CONNECT request.
#[derive(Debug, Clone)]
pub enum Destination {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl Destination {
    pub fn host_string(&self) -> String {
        match self {
            Destination::Ipv4(a) => a.to_string(),
            Destination::Domain(d) => d.clone(),
            Destination::Ipv6(a) => a.to_string(),
        }
    }
}

/// Run the SOCKS5 protocol (§4.2) for one inbound connection, then a
/// bidirectional relay to the dialled peer. Returns once the connection
/// and the relay (if any) are fully torn down; never propagates
/// per-connection I/O errors; those are logged by the caller (the
/// engine emits a `ConnectionLog`, this module only returns `Ok(())` or
/// an error for cases worth a caller-visible trace entry).
pub async fn handle_connection<S>(
    mut client: S,
    dialer: &dyn Socks5Dialer,
    traffic_cb: Option<TrafficCallback>,
    cancel: CancellationToken,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut buf = [0u8; 256];

    // 1. Method-selection request.
    read_exact_or_close(&mut client, &mut buf[..2]).await?;
    let nmethods = buf[1] as usize;
    read_exact_or_close(&mut client, &mut buf[..nmethods]).await?;
    if !buf[..nmethods].contains(&0x00) {
        client.write_all(&[SOCKS5_VERSION, NO_ACCEPTABLE_METHODS]).await.ok();
        return Ok(());
    }
    client.write_all(&[SOCKS5_VERSION, 0x00]).await?;

    // 2. Request header: VER CMD RSV ATYP.
    read_exact_or_close(&mut client, &mut buf[..4]).await?;
    let cmd = buf[1];
    let atyp = buf[3];

    if cmd != CMD_CONNECT {
        reply_and_close(&mut client, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Ok(());
    }

    let dest = match atyp {
        ATYP_IPV4 => {
            read_exact_or_close(&mut client, &mut buf[..4]).await?;
            Destination::Ipv4(Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]))
        }
        ATYP_DOMAIN => {
            read_exact_or_close(&mut client, &mut buf[..1]).await?;
            let len = buf[0] as usize;
            read_exact_or_close(&mut client, &mut buf[..len]).await?;
            let name = String::from_utf8_lossy(&buf[..len]).to_string();
            Destination::Domain(name)
        }
        ATYP_IPV6 => {
            read_exact_or_close(&mut client, &mut buf[..16]).await?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            Destination::Ipv6(Ipv6Addr::from(octets))
        }
        _ => {
            reply_and_close(&mut client, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Ok(());
        }
    };

    read_exact_or_close(&mut client, &mut buf[..2]).await?;
    let port = u16::from_be_bytes([buf[0], buf[1]]);

    // 3. Dial through the SSH client and reply.
    let peer = match dialer.dial(&dest.host_string(), port).await {
        Ok(peer) => peer,
        Err(_) => {
            reply_and_close(&mut client, REPLY_HOST_UNREACHABLE).await?;
            return Ok(());
        }
    };
    client
        .write_all(&[SOCKS5_VERSION, REPLY_SUCCESS, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;

    // 4. Bidirectional relay.
    let (bytes_from_remote, bytes_to_remote) = crate::relay::run(client, peer, cancel).await;
    if let Some(cb) = traffic_cb {
        cb(bytes_from_remote, bytes_to_remote);
    }

    Ok(())
}

async fn read_exact_or_close<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut [u8]) -> Result<()> {
    stream
        .read_exact(buf)
        .await
        .map_err(EngineError::Io)
}

async fn reply_and_close<S: AsyncWrite + Unpin>(stream: &mut S, code: u8) -> Result<()> {
    stream
        .write_all(&[SOCKS5_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::TcpStream;

    struct LoopbackDialer;

    #[async_trait::async_trait]
    impl Socks5Dialer for LoopbackDialer {
        async fn dial(&self, host: &str, port: u16) -> io::Result<Box<dyn AsyncDuplex>> {
            let stream = TcpStream::connect((host, port)).await?;
            Ok(Box::new(stream))
        }
    }

    struct RefusingDialer;

    #[async_trait::async_trait]
    impl Socks5Dialer for RefusingDialer {
        async fn dial(&self, _host: &str, _port: u16) -> io::Result<Box<dyn AsyncDuplex>> {
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    /// S3: client offers only a password method; server replies 05 FF and closes.
    #[tokio::test]
    async fn rejects_non_no_auth_methods() {
        let (mut client, server) = duplex(256);
        let handle = tokio::spawn(async move {
            handle_connection(server, &RefusingDialer, None, CancellationToken::new()).await
        });

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0xFF]);

        handle.await.unwrap().unwrap();
    }

    /// S2-shaped: a CONNECT to an IPv4 destination gets a success reply
    /// with BND.ADDR/BND.PORT = 0.0.0.0:0.
    #[tokio::test]
    async fn connect_to_ipv4_destination_succeeds() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            let _ = sock.read(&mut buf).await;
        });

        let (mut client, server) = duplex(256);
        let handle = tokio::spawn(async move {
            handle_connection(server, &LoopbackDialer, None, CancellationToken::new()).await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();
        assert_eq!(method_reply, [0x05, 0x00]);

        let mut request = vec![0x05, 0x01, 0x00, 0x01];
        request.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
        request.extend_from_slice(&port.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(&connect_reply[..4], &[0x05, 0x00, 0x00, 0x01]);
        assert_eq!(&connect_reply[4..], &[0, 0, 0, 0, 0, 0]);

        client.write_all(b"ping").await.unwrap();
        drop(client);
        handle.await.unwrap().unwrap();
    }

    /// Unreachable dialer yields reply code 0x04.
    #[tokio::test]
    async fn unreachable_destination_replies_host_unreachable() {
        let (mut client, server) = duplex(256);
        let handle = tokio::spawn(async move {
            handle_connection(server, &RefusingDialer, None, CancellationToken::new()).await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        let mut request = vec![0x05, 0x01, 0x00, 0x01];
        request.extend_from_slice(&Ipv4Addr::new(10, 0, 0, 1).octets());
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut connect_reply = [0u8; 10];
        client.read_exact(&mut connect_reply).await.unwrap();
        assert_eq!(connect_reply[1], REPLY_HOST_UNREACHABLE);

        handle.await.unwrap().unwrap();
    }

    /// Non-CONNECT commands are rejected with 0x07.
    #[tokio::test]
    async fn rejects_non_connect_command() {
        let (mut client, server) = duplex(256);
        let handle = tokio::spawn(async move {
            handle_connection(server, &RefusingDialer, None, CancellationToken::new()).await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        // CMD = 0x02 (BIND), unsupported.
        let mut request = vec![0x05, 0x02, 0x00, 0x01];
        request.extend_from_slice(&Ipv4Addr::LOCALHOST.octets());
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_COMMAND_NOT_SUPPORTED);

        handle.await.unwrap().unwrap();
    }

    /// Unknown address types are rejected with 0x08.
    #[tokio::test]
    async fn rejects_unknown_address_type() {
        let (mut client, server) = duplex(256);
        let handle = tokio::spawn(async move {
            handle_connection(server, &RefusingDialer, None, CancellationToken::new()).await
        });

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut method_reply = [0u8; 2];
        client.read_exact(&mut method_reply).await.unwrap();

        let request = vec![0x05, 0x01, 0x00, 0x7F];
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REPLY_ADDRESS_TYPE_NOT_SUPPORTED);

        handle.await.unwrap().unwrap();
    }
}
