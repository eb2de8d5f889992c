use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::providers::types::StreamEvent;

/// Incremental UTF-8 decoder that holds back a multi-byte sequence split
/// across chunk boundaries until the rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(s) => {
                    out.push_str(s);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + bad);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Forward a chunked text body as `Chunk` events, ending with `Done` or `Error`.
pub async fn forward_text_stream<S, E>(mut stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut decoder = Utf8Carry::default();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("Chat stream read failed: {}", e);
                let _ = tx.send(StreamEvent::Error(format!("Stream error: {}", e))).await;
                return;
            }
        };

        let text = decoder.push(&bytes);
        if !text.is_empty() && tx.send(StreamEvent::Chunk(text)).await.is_err() {
            return; // receiver dropped
        }
    }

    let tail = decoder.finish();
    if !tail.is_empty() && tx.send(StreamEvent::Chunk(tail)).await.is_err() {
        return;
    }
    let _ = tx.send(StreamEvent::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<Result<Bytes, String>>) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(16);
        forward_text_stream(futures::stream::iter(chunks), tx).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_split_multibyte_is_carried_over() {
        let bytes = "héllo 🦀".as_bytes();
        let crab_start = bytes.len() - 4;
        let mut dec = Utf8Carry::default();
        assert_eq!(dec.push(&bytes[..2]), "h");
        assert_eq!(dec.push(&bytes[2..crab_start + 1]), "éllo ");
        assert_eq!(dec.push(&bytes[crab_start + 1..]), "🦀");
        assert_eq!(dec.finish(), "");
    }

    #[test]
    fn test_invalid_bytes_become_replacement() {
        let mut dec = Utf8Carry::default();
        assert_eq!(dec.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_truncated_tail_flushes_lossily() {
        let mut dec = Utf8Carry::default();
        assert_eq!(dec.push(&[b'x', 0xE2, 0x82]), "x");
        assert_eq!(dec.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn test_forward_emits_chunks_then_done() {
        let euro = "€".as_bytes();
        let events = collect(vec![
            Ok(Bytes::from_static(b"Hello ")),
            Ok(Bytes::copy_from_slice(&euro[..1])),
            Ok(Bytes::copy_from_slice(&euro[1..])),
            Ok(Bytes::from_static(b"5")),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Chunk("Hello ".into()),
                StreamEvent::Chunk("€".into()),
                StreamEvent::Chunk("5".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_forward_reports_read_error() {
        let events = collect(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset".to_string()),
        ])
        .await;

        assert_eq!(events[0], StreamEvent::Chunk("partial".into()));
        assert!(matches!(&events[1], StreamEvent::Error(e) if e.contains("connection reset")));
        assert_eq!(events.len(), 2);
    }
}
