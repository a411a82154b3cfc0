//! Newline framing for the Arduino serial stream.
//!
//! Unlike `LinesCodec`, bad input never poisons the stream: invalid UTF-8 is
//! replaced lossily and overlong lines are thrown away, so a burst of noise on
//! the wire only costs the packets it touched.

use bytes::BytesMut;
use log::warn;
use tokio_util::codec::Decoder;

/// Longest line accepted before the buffer is discarded
pub const MAX_LINE_LENGTH: usize = 1024;

#[derive(Debug, Default)]
pub struct PacketLineCodec {
    /// Set while skipping the rest of an overlong line
    discarding: bool,
}

impl PacketLineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for PacketLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            match buf.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    let line = buf.split_to(newline + 1);
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    if newline > MAX_LINE_LENGTH {
                        warn!("Discarding serial line longer than {} bytes", MAX_LINE_LENGTH);
                        continue;
                    }
                    let text = String::from_utf8_lossy(&line[..newline]);
                    return Ok(Some(text.trim_end_matches('\r').to_string()));
                }
                None => {
                    if buf.len() > MAX_LINE_LENGTH {
                        if !self.discarding {
                            warn!("Discarding serial line longer than {} bytes", MAX_LINE_LENGTH);
                        }
                        self.discarding = true;
                        buf.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }

        let rest = buf.split();
        let text = String::from_utf8_lossy(&rest);
        Ok(Some(text.trim_end_matches('\r').to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_complete_lines() {
        let mut codec = PacketLineCodec::new();
        let mut buf = BytesMut::from(&b"1,2,3\r\n4,5,6\n7,8"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("1,2,3".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("4,5,6".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"7,8");
    }

    #[test]
    fn test_partial_line_completed_later() {
        let mut codec = PacketLineCodec::new();
        let mut buf = BytesMut::from(&b"50.2,1.3"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b",12.1\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some("50.2,1.3,12.1".to_string())
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut codec = PacketLineCodec::new();
        let mut buf = BytesMut::from(&b"\xff\xfe1,2\n"[..]);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert!(line.ends_with("1,2"));
        assert!(line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut codec = PacketLineCodec::new();
        let mut buf = BytesMut::from(&vec![b'9'; MAX_LINE_LENGTH + 1][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        // Tail of the overlong line, then a good one
        buf.extend_from_slice(b"999\n1,2,3\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("1,2,3".to_string()));
    }

    #[test]
    fn test_overlong_line_discarded_when_read_whole() {
        let mut codec = PacketLineCodec::new();
        let mut data = vec![b'9'; MAX_LINE_LENGTH + 1];
        data.extend_from_slice(b"\n1,2,3\n");
        let mut buf = BytesMut::from(&data[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("1,2,3".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_at_limit_is_kept() {
        let mut codec = PacketLineCodec::new();
        let mut data = vec![b'9'; MAX_LINE_LENGTH];
        data.push(b'\n');
        let mut buf = BytesMut::from(&data[..]);

        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), MAX_LINE_LENGTH);
    }

    #[test]
    fn test_eof_flushes_trailing_line() {
        let mut codec = PacketLineCodec::new();
        let mut buf = BytesMut::from(&b"1,2,3"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("1,2,3".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }
}
