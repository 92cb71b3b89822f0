use std::collections::VecDeque;
use futures::stream::{Stream, StreamExt};
use crate::error::ClientError;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// `event:` field, "message" when absent
    pub event: String,
    pub data: String,
}

/// Incremental decoder for the `text/event-stream` framing.
///
/// Lines end in `\n`, `\r\n` or a bare `\r`. Bytes may arrive split
/// anywhere, including inside a UTF-8 sequence or between `\r` and `\n`;
/// only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Last line ended in `\r`; a leading `\n` belongs to that terminator
    skip_lf: bool,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseMessage> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            if self.skip_lf {
                match self.buf.first() {
                    Some(b'\n') => {
                        self.buf.remove(0);
                        self.skip_lf = false;
                    }
                    Some(_) => self.skip_lf = false,
                    None => break,
                }
            }
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            self.skip_lf = line.pop() == Some(b'\r');
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                out.push(message);
            }
        }
        out
    }

    fn process_line(&mut self, line: &str) -> Option<SseMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            // id/retry are irrelevant: reconnects are scheduled by the supervisor
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

struct DecodeState<S> {
    body: S,
    decoder: SseDecoder,
    queue: VecDeque<SseMessage>,
    done: bool,
}

/// Decode a response body into SSE messages.
///
/// The stream always ends with an error item: the transport error, or
/// `StreamClosed` when the server finishes the body. An SSE channel has no
/// clean end from the client's point of view.
pub fn decode<S, B>(body: S) -> impl Stream<Item = Result<SseMessage, ClientError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        body,
        decoder: SseDecoder::default(),
        queue: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.queue.pop_front() {
                return Some((Ok(message), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let messages = state.decoder.feed(chunk.as_ref());
                    state.queue.extend(messages);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ClientError::Transport(e)), state));
                }
                None => {
                    state.done = true;
                    return Some((Err(ClientError::StreamClosed), state));
                }
            }
        }
    })
}
