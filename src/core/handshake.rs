//! Best-effort inspection of the tunneled connect handshake.
//!
//! Only reads from a borrowed slice, so the frame forwarded afterwards is the
//! exact frame that was inspected.

use crate::core::message::Reader;
use crate::error::{Result, RustyRelayError};

/// Leading byte of the tunneled protocol's connect packet
pub const CONNECT_PACKET_ID: u8 = 3;

const UNCOMPRESSED: u8 = 0;
const LZ4_COMPRESSED: u8 = 1;

/// Extract the client build from a connect packet.
///
/// Returns `Ok(None)` when the frame is not a connect packet. Layout:
/// `[id:u8][length:u16][compressed:u8][body]`, the body starting with the
/// build as a big-endian `i32`.
pub fn peek_client_version(frame: &[u8]) -> Result<Option<i32>> {
    if frame.first() != Some(&CONNECT_PACKET_ID) {
        return Ok(None);
    }

    let mut reader = Reader::new(frame);
    reader.u8()?;
    let length = reader.u16()? as usize;

    let body = match reader.u8()? {
        UNCOMPRESSED => reader.remaining().to_vec(),
        LZ4_COMPRESSED => lz4_flex::block::decompress(reader.remaining(), length)
            .map_err(|e| RustyRelayError::MalformedFrame(format!("lz4: {}", e)))?,
        other => {
            return Err(RustyRelayError::MalformedFrame(format!(
                "unknown compression flag {}",
                other
            )))
        }
    };

    Ok(Some(Reader::new(&body).i32()?))
}

/// Advisory sent to clients running an outdated build
pub fn outdated_advisory(version: i32, minimum: i32) -> String {
    format!(
        "[scarlet]\u{26a0}[] Your game build ({}) is older than {}. Some features may not work, please update.",
        version, minimum
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_frame(version: i32, compressed: bool) -> Vec<u8> {
        let mut body = version.to_be_bytes().to_vec();
        body.extend_from_slice(b"official-build-padding-to-make-it-longer");

        let mut frame = vec![CONNECT_PACKET_ID];
        frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
        if compressed {
            frame.push(LZ4_COMPRESSED);
            frame.extend_from_slice(&lz4_flex::block::compress(&body));
        } else {
            frame.push(UNCOMPRESSED);
            frame.extend_from_slice(&body);
        }
        frame
    }

    #[test]
    fn test_plain_connect_packet() {
        assert_eq!(peek_client_version(&connect_frame(140, false)).unwrap(), Some(140));
    }

    #[test]
    fn test_compressed_connect_packet() {
        assert_eq!(peek_client_version(&connect_frame(146, true)).unwrap(), Some(146));
    }

    #[test]
    fn test_other_packets_are_ignored() {
        assert_eq!(peek_client_version(&[7, 0, 1, 0, 9]).unwrap(), None);
        assert_eq!(peek_client_version(&[]).unwrap(), None);
    }

    #[test]
    fn test_unknown_compression_is_an_error() {
        let mut frame = connect_frame(140, false);
        frame[3] = 5;
        assert!(peek_client_version(&frame).is_err());
    }

    #[test]
    fn test_corrupt_lz4_is_an_error() {
        let frame = vec![CONNECT_PACKET_ID, 0, 40, LZ4_COMPRESSED, 0xFF, 0xFF];
        assert!(peek_client_version(&frame).is_err());
    }
}
