use crate::protocol::mysql::packet::{packet, Packet};

use std::io;

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

const PACKET_BUFFER_SIZE: usize = 4096;
const PACKET_LARGE_BUFFER_SIZE: usize = 1048576;

/// [`PacketReader`] reads from a client stream and yields complete MySQL
/// [`Packet`]s together with the sequence id of their last frame.
///
/// Bytes that were read past the end of a packet stay buffered; the
/// `AsyncRead` passthrough below drains them first, which is what allows a
/// TLS acceptor to take over the stream mid-handshake without losing
/// pipelined bytes.
pub struct PacketReader<R> {
    bytes: Vec<u8>,
    start: usize,
    remaining: usize,
    r: R,
}

impl<R> PacketReader<R> {
    pub fn new(r: R) -> Self {
        PacketReader {
            bytes: Vec::new(),
            start: 0,
            remaining: 0,
            r,
        }
    }

    /// Tear the reader apart into the bytes it buffered but never parsed and
    /// the underlying stream. Used when upgrading the connection to TLS.
    pub fn into_parts(mut self) -> (Vec<u8>, R) {
        let mut tail = self.bytes.split_off(self.start);
        tail.truncate(self.remaining);
        (tail, self.r)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PacketReader<R> {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        if self.remaining != 0 {
            let start = self.start;
            let end = start + self.remaining;
            buf.put_slice(&self.bytes[start..end]);
            self.bytes.clear();
            self.start = 0;
            self.remaining = 0;
            std::task::Poll::Ready(Ok(()))
        } else {
            std::pin::Pin::new(&mut self.r).poll_read(cx, buf)
        }
    }
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Next complete packet, or `None` on a clean EOF between packets.
    pub async fn next_async(&mut self) -> io::Result<Option<(u8, Packet)>> {
        let mut buffer_size = PACKET_BUFFER_SIZE;
        loop {
            if self.remaining != 0 {
                let window = {
                    let start = self.start;
                    let end = start + self.remaining;
                    self.bytes[start..end].to_vec()
                };
                match packet(&window) {
                    Ok((rest, p)) => {
                        self.start += self.remaining - rest.len();
                        self.remaining = rest.len();
                        return Ok(Some(p));
                    }
                    Err(nom::Err::Incomplete(_)) | Err(nom::Err::Error(_)) => {}
                    Err(nom::Err::Failure(ctx)) => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("{:?}", ctx),
                        ));
                    }
                }
            }

            // compact consumed bytes, then read some more
            self.bytes.drain(0..self.start);
            self.start = 0;
            let end = self.remaining;
            self.bytes.truncate(end);
            if self.bytes.capacity() - end < buffer_size {
                self.bytes.reserve(buffer_size);
            }
            let read = self.r.read_buf(&mut self.bytes).await?;
            self.remaining = end + read;
            // use a larger buffer size to reduce resize churn on big resultsets.
            buffer_size = PACKET_LARGE_BUFFER_SIZE;
            if read == 0 {
                if self.remaining == 0 {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} unhandled bytes", self.remaining),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PacketReader;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_single_packet() {
        let bytes: &[u8] = &[0x01, 0x00, 0x00, 0x00, 0x0e];
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let (seq, pkt) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(seq, 0);
        assert_eq!(&*pkt, &[0x0e]);
        assert!(reader.next_async().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_back_to_back_packets() {
        let bytes: &[u8] = &[
            0x01, 0x00, 0x00, 0x00, 0x0e, // ping
            0x05, 0x00, 0x00, 0x00, 0x03, b't', b'e', b's', b't', // query
        ];
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let (_, first) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(&*first, &[0x0e]);
        let (_, second) = reader.next_async().await.unwrap().unwrap();
        assert_eq!(&*second, &[0x03, b't', b'e', b's', b't']);
    }

    #[tokio::test]
    async fn test_into_parts_keeps_pipelined_bytes() {
        let bytes: &[u8] = &[
            0x01, 0x00, 0x00, 0x00, 0x0e, // ping
            0x01, 0x00, 0x00, 0x01, 0x01, // pipelined quit
        ];
        let mut reader = PacketReader::new(Cursor::new(bytes));
        let _ = reader.next_async().await.unwrap().unwrap();
        let (leftover, _stream) = reader.into_parts();
        assert_eq!(leftover, vec![0x01, 0x00, 0x00, 0x01, 0x01]);
    }
}
