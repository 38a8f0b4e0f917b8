//! 接收管線：位元組來源 + 協定解碼器
//!
//! 讀取迴圈每讀到一個 chunk 就交給 [`Inbound::ingest`]。若解碼途中遇到壓縮
//! 起始標記，同一個 chunk 的剩餘部分立即改走解壓縮串流，接縫處不會遺失或重複。

use super::compression::{ByteSource, CompressionError};
use super::decoder::{DecodedEvent, NegotiationState, ProtocolDecoder};
use crate::encoding::Codepage;

#[derive(Debug, Default)]
pub struct Inbound {
    decoder: ProtocolDecoder,
    source: ByteSource,
}

impl Inbound {
    pub fn new(codepage: Codepage) -> Self {
        Self {
            decoder: ProtocolDecoder::new(codepage),
            source: ByteSource::Raw,
        }
    }

    pub fn negotiation(&self) -> &NegotiationState {
        self.decoder.state()
    }

    pub fn is_compressed(&self) -> bool {
        self.source.is_compressed()
    }

    /// 處理從 socket 讀到的一個 chunk
    pub fn ingest(&mut self, chunk: &[u8]) -> Result<Vec<DecodedEvent>, CompressionError> {
        let mut events = Vec::new();
        let mut pending = Vec::with_capacity(chunk.len());
        self.source.pump(chunk, &mut pending)?;

        loop {
            let feed = self.decoder.feed(&pending);
            events.extend(feed.events);

            let Some(at) = feed.compress_from else {
                break;
            };
            let rest = pending.split_off(at);
            pending.clear();
            self.source.activate();
            self.source.pump(&rest, &mut pending)?;
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::protocol::{TelnetCommand, IAC};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    const SB: u8 = TelnetCommand::Sb as u8;
    const SE: u8 = TelnetCommand::Se as u8;
    const WILL: u8 = TelnetCommand::Will as u8;

    fn lines(events: &[DecodedEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                DecodedEvent::Line(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_compression_seam_has_no_loss() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"tail of first\r\nsecond ").unwrap();
        encoder.flush().unwrap();
        let part1 = std::mem::take(encoder.get_mut());
        encoder.write_all(b"read\r\n").unwrap();
        encoder.flush().unwrap();
        let part2 = std::mem::take(encoder.get_mut());

        let mut chunk = b"plain\r\nhead ".to_vec();
        chunk.extend_from_slice(&[IAC, SB, 85, WILL, SE]);
        // 標記之後的前幾個壓縮位元組跟原始資料在同一個 chunk
        chunk.extend_from_slice(&part1[..3]);

        let mut inbound = Inbound::default();
        let events = inbound.ingest(&chunk).unwrap();
        assert_eq!(lines(&events), vec!["plain"]);
        assert!(inbound.is_compressed());

        let events = inbound.ingest(&part1[3..]).unwrap();
        assert_eq!(lines(&events), vec!["head tail of first"]);

        let events = inbound.ingest(&part2).unwrap();
        assert_eq!(lines(&events), vec!["second read"]);
    }

    #[test]
    fn test_raw_stream_stays_raw() {
        let mut inbound = Inbound::default();
        let events = inbound.ingest(b"a\r\nb\r\n").unwrap();
        assert_eq!(lines(&events), vec!["a", "b"]);
        assert!(!inbound.is_compressed());
    }
}
