use crate::protocol::mysql::constants;
use byteorder::{ByteOrder, LittleEndian};

use std::io;
use std::io::prelude::*;
use std::io::IoSlice;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// [`PacketWriter`] accumulates one MySQL payload through its [`Write`]
/// impl and frames it on [`PacketWriter::end_packet`], splitting at the
/// 16M-1 payload boundary and stamping sequence ids.
pub struct PacketWriter<W> {
    buf: Vec<u8>,
    seq: u8,
    pub inner_writer: W,
}

impl<W> PacketWriter<W> {
    pub fn new(write: W) -> Self {
        Self {
            buf: Vec::new(),
            seq: 0,
            inner_writer: write,
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take_buffer(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    pub fn set_seq(&mut self, seq: u8) {
        self.seq = seq;
    }

    fn increase_seq(&mut self) {
        self.seq = self.seq.wrapping_add(1);
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }
}

impl<W> Write for PacketWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub async fn end_packet(&mut self) -> io::Result<()> {
        let mut header = [0; constants::PACKET_HEADER_LEN];
        if !self.is_empty() {
            let raw_packet = self.take_buffer();
            // split the raw buffer at the boundary of size MAX_PAYLOAD_LEN
            let chunks = raw_packet.chunks(constants::MAX_PAYLOAD_LEN);
            for chunk in chunks {
                LittleEndian::write_u24(&mut header, chunk.len() as u32);
                header[3] = self.seq();
                self.increase_seq();
                // depending on the AsyncWrite provided this may or may not
                // hit a real syscall (e.g. a buffered stream)
                let written = self
                    .inner_writer
                    .write_vectored(&[IoSlice::new(&header), IoSlice::new(chunk)])
                    .await?;

                // if the write buffer is not drained, fall back to write_all
                if written != constants::PACKET_HEADER_LEN + chunk.len() {
                    let remaining: Vec<u8> = header
                        .iter()
                        .chain(chunk.iter())
                        .skip(written)
                        .cloned()
                        .collect();
                    self.inner_writer.write_all(&remaining).await?
                }
            }
            Ok(())
        } else {
            // packet with an empty payload, e.g. an empty auth response
            LittleEndian::write_u24(&mut header, 0);
            header[3] = self.seq();
            self.increase_seq();
            self.inner_writer.write_all(&header).await
        }
    }

    pub async fn flush_all(&mut self) -> io::Result<()> {
        self.inner_writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::PacketWriter;
    use std::io::Write;

    #[tokio::test]
    async fn test_frame_small_packet() {
        let mut w = PacketWriter::new(Vec::new());
        w.set_seq(1);
        w.write_all(&[0x0e]).unwrap();
        w.end_packet().await.unwrap();
        assert_eq!(w.inner_writer, vec![0x01, 0x00, 0x00, 0x01, 0x0e]);
        assert_eq!(w.seq(), 2);
    }

    #[tokio::test]
    async fn test_frame_empty_packet() {
        let mut w = PacketWriter::new(Vec::new());
        w.end_packet().await.unwrap();
        assert_eq!(w.inner_writer, vec![0x00, 0x00, 0x00, 0x00]);
    }
}
