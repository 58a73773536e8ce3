//! Decoding of the chat route's `data: <json>` line stream.

use chatline_backend::StreamFrame;

use crate::message::MessageId;
use crate::store::{ConversationStore, StoreResult};

pub const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk {
        text: String,
    },
    Final {
        text: String,
        image_url: Option<String>,
    },
}

/// Splits a byte stream into lines, holding partial lines across reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
    // Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every line completed by `bytes`, without the terminator.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut line_start = 0;
        for position in self.scanned..self.pending.len() {
            if self.pending[position] == b'\n' {
                lines.push(decode_line(&self.pending[line_start..position]));
                line_start = position + 1;
            }
        }
        self.pending.drain(..line_start);
        self.scanned = self.pending.len();
        lines
    }

    /// Flushes an unterminated trailing line, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Turns one line into events. Lines without the data prefix carry nothing.
///
/// A frame holding both fields yields the chunk before the final value.
pub fn parse_line(line: &str) -> Result<Vec<StreamEvent>, serde_json::Error> {
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Ok(Vec::new());
    };
    let frame = serde_json::from_str::<StreamFrame>(payload)?;

    let mut events = Vec::with_capacity(2);
    if let Some(text) = frame.chunk.filter(|text| !text.is_empty()) {
        events.push(StreamEvent::Chunk { text });
    }
    if let Some(text) = frame.final_text.filter(|text| !text.is_empty()) {
        events.push(StreamEvent::Final {
            text,
            image_url: frame.image_url.filter(|url| !url.is_empty()),
        });
    }
    Ok(events)
}

/// What applying one event did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Text {
        id: MessageId,
        text: String,
    },
    Completed {
        id: MessageId,
        text: String,
        image_url: Option<String>,
    },
    Ignored,
}

/// Per-send stream state: the line decoder plus the running text of the reply.
#[derive(Debug, Default)]
pub struct StreamIngester {
    decoder: FrameDecoder,
    accumulator: String,
    finished: bool,
    skipped_frames: usize,
}

impl StreamIngester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let lines = self.decoder.push(bytes);
        self.parse_lines(lines)
    }

    /// Drains whatever the stream left unterminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let lines = self.decoder.finish().into_iter().collect();
        self.parse_lines(lines)
    }

    fn parse_lines(&mut self, lines: Vec<String>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for line in lines {
            match parse_line(&line) {
                Ok(parsed) => events.extend(parsed),
                Err(error) => {
                    self.skipped_frames += 1;
                    tracing::warn!(error = %error, line = %line, "skipping malformed stream frame");
                }
            }
        }
        events
    }

    /// Applies one event to the in-flight message. Anything after the final event is ignored.
    pub fn apply(
        &mut self,
        event: StreamEvent,
        store: &mut ConversationStore,
    ) -> StoreResult<Applied> {
        if self.finished {
            tracing::debug!(?event, "ignoring event after final");
            return Ok(Applied::Ignored);
        }

        match event {
            StreamEvent::Chunk { text } => {
                self.accumulator.push_str(&text);
                let id = store.mutate_last_text(self.accumulator.clone())?;
                Ok(Applied::Text {
                    id,
                    text: self.accumulator.clone(),
                })
            }
            StreamEvent::Final { text, image_url } => {
                let id = store.mutate_last_final(text.clone(), image_url.clone())?;
                self.finished = true;
                Ok(Applied::Completed {
                    id,
                    text,
                    image_url,
                })
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn accumulator(&self) -> &str {
        &self.accumulator
    }

    pub fn skipped_frames(&self) -> usize {
        self.skipped_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_placeholder() -> ConversationStore {
        let mut store = ConversationStore::new();
        store.append_user("Hello", Vec::new());
        store.append_placeholder_assistant();
        store
    }

    fn feed(
        ingester: &mut StreamIngester,
        store: &mut ConversationStore,
        bytes: &[u8],
    ) -> Vec<Applied> {
        ingester
            .push_bytes(bytes)
            .into_iter()
            .map(|event| ingester.apply(event, store).unwrap())
            .collect()
    }

    #[test]
    fn hello_reply_streams_then_completes() {
        let mut store = store_with_placeholder();
        let mut ingester = StreamIngester::new();

        feed(&mut ingester, &mut store, b"data: {\"chunk\":\"Hi\"}\n");
        assert_eq!(store.last().unwrap().text, "Hi");

        feed(&mut ingester, &mut store, b"data: {\"chunk\":\" there\"}\n");
        assert_eq!(store.last().unwrap().text, "Hi there");

        let applied = feed(
            &mut ingester,
            &mut store,
            b"data: {\"final\":\"Hi there!\",\"image_url\":null}\n",
        );
        assert!(matches!(applied.as_slice(), [Applied::Completed { .. }]));

        let last = store.last().unwrap();
        assert_eq!(last.text, "Hi there!");
        assert_eq!(last.image_url, None);
        assert!(last.is_complete);
        assert!(ingester.is_finished());
    }

    #[test]
    fn frame_split_inside_a_multibyte_character_decodes_intact() {
        let line = "data: {\"chunk\":\"h\u{e9}llo \u{1f600}\"}\n".as_bytes();
        let split = line.iter().position(|byte| *byte == 0xc3).unwrap() + 1;

        let mut decoder = FrameDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert!(decoder.has_pending());
        let lines = decoder.push(&line[split..]);

        assert_eq!(lines, ["data: {\"chunk\":\"h\u{e9}llo \u{1f600}\"}"]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn byte_at_a_time_delivery_matches_whole_delivery() {
        let body = "data: {\"chunk\":\"\u{4f60}\u{597d}\"}\r\ndata: {\"final\":\"\u{4f60}\u{597d}!\"}\n";

        let mut whole = StreamIngester::new();
        let expected = whole.push_bytes(body.as_bytes());

        let mut trickle = StreamIngester::new();
        let mut events = Vec::new();
        for byte in body.as_bytes() {
            events.extend(trickle.push_bytes(std::slice::from_ref(byte)));
        }

        assert_eq!(events, expected);
        assert_eq!(
            events,
            [
                StreamEvent::Chunk {
                    text: "\u{4f60}\u{597d}".to_string()
                },
                StreamEvent::Final {
                    text: "\u{4f60}\u{597d}!".to_string(),
                    image_url: None
                },
            ]
        );
    }

    #[test]
    fn long_line_in_small_reads_then_several_lines_in_one_read() {
        let mut decoder = FrameDecoder::new();
        let long = format!("data: {{\"chunk\":\"{}\"}}", "x".repeat(20_000));
        for piece in long.as_bytes().chunks(7) {
            assert!(decoder.push(piece).is_empty());
        }
        assert!(decoder.has_pending());

        let lines = decoder.push(b"\nfirst\r\nsecond\nthi");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], long);
        assert_eq!(lines[1], "first");
        assert_eq!(lines[2], "second");

        assert_eq!(decoder.push(b"rd\n"), vec!["third".to_string()]);
        assert!(!decoder.has_pending());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn unterminated_last_line_is_flushed_at_end_of_stream() {
        let mut ingester = StreamIngester::new();
        assert!(ingester.push_bytes(b"data: {\"final\":\"done\"}").is_empty());
        assert_eq!(
            ingester.finish(),
            [StreamEvent::Final {
                text: "done".to_string(),
                image_url: None
            }]
        );
        assert!(ingester.finish().is_empty());
    }

    #[test]
    fn chunk_then_final_from_one_frame() {
        let events =
            parse_line(r#"data: {"chunk":"a","final":"ab","image_url":"http://img/x.png"}"#)
                .unwrap();
        assert_eq!(
            events,
            [
                StreamEvent::Chunk {
                    text: "a".to_string()
                },
                StreamEvent::Final {
                    text: "ab".to_string(),
                    image_url: Some("http://img/x.png".to_string())
                },
            ]
        );
    }

    #[test]
    fn empty_fields_and_foreign_lines_carry_nothing() {
        assert!(parse_line(r#"data: {"chunk":"","final":""}"#).unwrap().is_empty());
        assert!(parse_line("").unwrap().is_empty());
        assert!(parse_line(": keep-alive").unwrap().is_empty());
        assert!(parse_line(r#"event: {"chunk":"x"}"#).unwrap().is_empty());
    }

    #[test]
    fn malformed_frame_is_skipped_and_stream_continues() {
        let mut store = store_with_placeholder();
        let mut ingester = StreamIngester::new();

        feed(
            &mut ingester,
            &mut store,
            b"data: {\"chunk\":\"A\"}\ndata: {not json\ndata: {\"chunk\":\"B\"}\n",
        );

        assert_eq!(ingester.skipped_frames(), 1);
        assert_eq!(store.last().unwrap().text, "AB");
        assert_eq!(ingester.accumulator(), "AB");
    }

    #[test]
    fn events_after_final_are_ignored() {
        let mut store = store_with_placeholder();
        let mut ingester = StreamIngester::new();

        let applied = feed(
            &mut ingester,
            &mut store,
            b"data: {\"final\":\"done\"}\ndata: {\"chunk\":\"late\"}\ndata: {\"final\":\"again\"}\n",
        );

        assert_eq!(applied[1..], [Applied::Ignored, Applied::Ignored]);
        assert_eq!(store.last().unwrap().text, "done");
    }

    #[test]
    fn chunk_without_in_flight_message_is_an_error() {
        let mut store = ConversationStore::new();
        store.append_user("Hello", Vec::new());
        let mut ingester = StreamIngester::new();

        let result = ingester.apply(
            StreamEvent::Chunk {
                text: "x".to_string(),
            },
            &mut store,
        );
        assert!(result.is_err());
        assert_eq!(store.last().unwrap().text, "Hello");
    }
}
