/// One server-sent event from the push endpoint.
///
/// The payload is kept only for logging; the invalidation channel treats
/// every frame as an opaque change signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PushFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental decoder for a `text/event-stream` byte feed.
///
/// Frames may be split across network chunks; bytes are buffered until a
/// blank-line delimiter completes a frame.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<PushFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((end, delim_len)) = next_delimiter(&self.buf) {
            let frame_bytes: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            if let Some(frame) = decode_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        frames
    }
}

fn next_delimiter(buf: &[u8]) -> Option<(usize, usize)> {
    for (i, pair) in buf.windows(2).enumerate() {
        if pair == b"\n\n" {
            return Some((i, 2));
        }
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
    }
    None
}

fn decode_frame(bytes: &[u8]) -> Option<PushFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        // Blank and comment lines carry nothing.
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(PushFrame {
        event,
        data: data_lines.join("\n"),
    })
}
