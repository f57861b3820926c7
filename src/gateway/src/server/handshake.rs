//! Connection-phase plumbing: the initial handshake, the optional TLS
//! upgrade, and the authentication exchange.

use crate::protocol::mysql::basic::{client_handshake_response, HandshakeResponse};
use crate::protocol::mysql::constants::AuthPluginName::AuthNativePassword;
use crate::protocol::mysql::constants::SCRAMBLE_SIZE;
use crate::protocol::mysql::error_codes::ErrorKind;
use crate::protocol::mysql::packet::packet_reader::PacketReader;
use crate::protocol::mysql::packet::packet_writer::PacketWriter;
use crate::protocol::mysql::packet::writers;
use crate::server::{default_capabilities, CmdHandler, SERVER_VERSION};

use mysql_common::constants::CapabilityFlags;
use pin_project::pin_project;
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// A stream that first drains bytes another reader had already buffered.
/// The TLS acceptor takes over mid-connection; any ClientHello bytes that
/// arrived glued to the SSLRequest packet must not be lost.
#[pin_project]
pub struct PrefixedIo<S> {
    leftover: Vec<u8>,
    pos: usize,
    #[pin]
    inner: S,
}

impl<S> PrefixedIo<S> {
    pub fn new(leftover: Vec<u8>, inner: S) -> Self {
        Self {
            leftover,
            pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead> AsyncRead for PrefixedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        if *this.pos < this.leftover.len() {
            let n = (this.leftover.len() - *this.pos).min(buf.remaining());
            buf.put_slice(&this.leftover[*this.pos..*this.pos + n]);
            *this.pos += n;
            return Poll::Ready(Ok(()));
        }
        this.inner.poll_read(cx, buf)
    }
}

impl<S: AsyncWrite> AsyncWrite for PrefixedIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.project().inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}

#[cfg(feature = "tls")]
pub type TlsClientStream = tokio_rustls::server::TlsStream<PrefixedIo<TcpStream>>;

/// The transport a connection settled on after the first handshake packet.
pub enum Negotiated {
    Plain {
        reader: PacketReader<OwnedReadHalf>,
        writer: PacketWriter<OwnedWriteHalf>,
        handshake: HandshakeResponse,
        seq: u8,
    },
    #[cfg(feature = "tls")]
    Tls {
        reader: PacketReader<tokio::io::ReadHalf<TlsClientStream>>,
        writer: PacketWriter<tokio::io::WriteHalf<TlsClientStream>>,
        handshake: HandshakeResponse,
        seq: u8,
    },
}

fn parse_handshake(pkt: &[u8], is_after_tls: bool) -> io::Result<HandshakeResponse> {
    match client_handshake_response(pkt, is_after_tls) {
        Ok((_, handshake)) => Ok(handshake),
        Err(e) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("bad client handshake: {e:?}"),
        )),
    }
}

fn closed() -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "peer terminated connection",
    )
}

/// Send the server greeting, read the client's handshake response, and
/// upgrade to TLS when the client asks for it.
pub async fn initial_handshake(
    stream: TcpStream,
    conn_id: u64,
    scramble: [u8; SCRAMBLE_SIZE],
    #[cfg(feature = "tls")] tls_conf: &Option<
        std::sync::Arc<tokio_rustls::rustls::ServerConfig>,
    >,
) -> io::Result<Negotiated> {
    let (read_half, write_half) = stream.into_split();
    let mut writer = PacketWriter::new(write_half);
    #[allow(unused_mut)]
    let mut server_caps = default_capabilities();
    #[cfg(feature = "tls")]
    if tls_conf.is_some() {
        server_caps |= CapabilityFlags::CLIENT_SSL;
    }
    writers::write_initial_handshake(&mut writer, conn_id, scramble, SERVER_VERSION, server_caps)
        .await?;

    let mut reader = PacketReader::new(read_half);
    let (seq, pkt) = reader.next_async().await?.ok_or_else(closed)?;
    let handshake = parse_handshake(&pkt, false)?;

    if handshake.client_flag.contains(CapabilityFlags::CLIENT_SSL) {
        #[cfg(feature = "tls")]
        if let Some(conf) = tls_conf {
            let (leftover, read_half) = reader.into_parts();
            let stream = read_half.reunite(writer.inner_writer).map_err(|e| {
                io::Error::new(
                    io::ErrorKind::Other,
                    format!("failed to reunite stream halves: {e}"),
                )
            })?;
            let acceptor = tokio_rustls::TlsAcceptor::from(std::sync::Arc::clone(conf));
            let tls_stream = acceptor.accept(PrefixedIo::new(leftover, stream)).await?;
            let (r, w) = tokio::io::split(tls_stream);
            let mut reader = PacketReader::new(r);
            let writer = PacketWriter::new(w);
            let (seq, pkt) = reader.next_async().await?.ok_or_else(closed)?;
            let handshake = parse_handshake(&pkt, true)?;
            info!("GatewaySrv client connection upgraded to TLS");
            return Ok(Negotiated::Tls {
                reader,
                writer,
                handshake,
                seq,
            });
        }
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "client requested SSL despite us not advertising support for it",
        ));
    }

    Ok(Negotiated::Plain {
        reader,
        writer,
        handshake,
        seq,
    })
}

/// Finish the connection phase: enforce protocol 4.1, run the auth-method
/// switch when the client answered with a different plugin, and verify the
/// credentials. A `false` return means the failure reply was already sent.
pub async fn respond_handshake<R, W, C>(
    reader: &mut PacketReader<R>,
    writer: &mut PacketWriter<W>,
    handler: &mut C,
    handshake: &HandshakeResponse,
    seq: u8,
    scramble: &[u8; SCRAMBLE_SIZE],
) -> io::Result<bool>
where
    R: AsyncRead + Send + Unpin,
    W: AsyncWrite + Send + Unpin,
    C: CmdHandler,
{
    if !handshake
        .client_flag
        .contains(CapabilityFlags::CLIENT_PROTOCOL_41)
    {
        writer.set_seq(seq.wrapping_add(1));
        writers::write_err_packet(
            writer,
            ErrorKind::ER_NOT_SUPPORTED_YET.code(),
            ErrorKind::ER_NOT_SUPPORTED_YET.sqlstate(),
            "CLIENT_PROTOCOL_41 is required. Please upgrade your client.",
        )
        .await?;
        return Ok(false);
    }

    let user = handshake.username_str();
    let mut auth_response = handshake.auth_response.clone();
    let mut seq = seq;

    let desired_plugin = AuthNativePassword.as_ref();
    if handshake.auth_plugin != desired_plugin.as_bytes() {
        // switch the client over to mysql_native_password
        writer.set_seq(seq.wrapping_add(1));
        writer.write_all(&[0xfe])?;
        writer.write_all(desired_plugin.as_bytes())?;
        writer.write_all(&[0x00])?;
        writer.write_all(scramble)?;
        writer.write_all(&[0x00])?;
        writer.end_packet().await?;
        writer.flush_all().await?;

        let (switch_seq, pkt) = reader.next_async().await?.ok_or_else(closed)?;
        seq = switch_seq;
        auth_response = pkt.to_vec();
    }

    writer.set_seq(seq.wrapping_add(1));
    if !handler.authenticate(&user, &auth_response, scramble).await {
        warn!("GatewaySrv authentication failed for user {user:?}");
        writers::write_err_packet(
            writer,
            ErrorKind::ER_ACCESS_DENIED_ERROR.code(),
            ErrorKind::ER_ACCESS_DENIED_ERROR.sqlstate(),
            &format!("Access denied for user '{user}'"),
        )
        .await?;
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::PrefixedIo;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_prefixed_io_serves_leftover_first() {
        let inner = std::io::Cursor::new(b"world".to_vec());
        let mut io = PrefixedIo::new(b"hello ".to_vec(), inner);
        let mut out = String::new();
        io.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello world");
    }
}
