//! Length-prefixed frame I/O.
//!
//! Every frame is a big-endian `u16` length followed by the codec payload.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::message::Packet;

/// Read one frame payload, rejecting empty frames and frames over `max_len`
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut head = [0u8; 2];
    r.read_exact(&mut head).await?;
    let len = u16::from_be_bytes(head) as usize;

    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty frame"));
    }
    if len > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut data = vec![0u8; len];
    r.read_exact(&mut data).await?;
    Ok(data)
}

/// Encode and write one packet as a frame, reusing `buf` as scratch space
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    packet: &Packet,
    buf: &mut Vec<u8>,
) -> io::Result<()> {
    buf.clear();
    buf.extend_from_slice(&[0, 0]);
    packet
        .encode(buf)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let len = u16::try_from(buf.len() - 2).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("packet too large: {} bytes", buf.len() - 2),
        )
    })?;
    buf[..2].copy_from_slice(&len.to_be_bytes());

    w.write_all(buf).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::FrameworkMessage;

    #[tokio::test]
    async fn test_write_then_read() {
        let mut wire = Vec::new();
        let mut scratch = Vec::new();
        let packet = Packet::Framework(FrameworkMessage::KeepAlive);
        write_frame(&mut wire, &packet, &mut scratch).await.unwrap();
        assert_eq!(wire, vec![0, 2, 0xFE, 2]);

        let mut reader = &wire[..];
        let payload = read_frame(&mut reader, 8192).await.unwrap();
        assert_eq!(Packet::decode(&payload).unwrap(), packet);
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let wire = [0x10u8, 0x00];
        let mut reader = &wire[..];
        let err = read_frame(&mut reader, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_empty_frame_is_rejected() {
        let wire = [0u8, 0];
        let mut reader = &wire[..];
        assert!(read_frame(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_eof() {
        let wire = [0u8, 4, 1, 2];
        let mut reader = &wire[..];
        let err = read_frame(&mut reader, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
