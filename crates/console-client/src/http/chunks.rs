use console_core::ClientError;

/// Incremental UTF-8 decoder for the chunked run body.
///
/// Network chunks may split a multi-byte sequence; the decoder emits the
/// longest valid prefix of what it has seen and buffers the remainder for
/// the next chunk.
#[derive(Default)]
pub(crate) struct Utf8ChunkDecoder {
    buf: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decodes one network chunk into a text fragment (possibly empty).
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<String, ClientError> {
        self.buf.extend_from_slice(chunk);
        match std::str::from_utf8(&self.buf) {
            Ok(text) => {
                let fragment = text.to_string();
                self.buf.clear();
                Ok(fragment)
            }
            Err(err) if err.error_len().is_none() => {
                // Incomplete trailing sequence: emit the valid prefix and
                // keep the tail for the next chunk.
                let valid = err.valid_up_to();
                let fragment = String::from_utf8_lossy(&self.buf[..valid]).into_owned();
                self.buf.drain(..valid);
                Ok(fragment)
            }
            Err(_) => Err(ClientError::validation("run stream is not valid UTF-8")),
        }
    }

    /// Checks that no partial sequence is left once the stream ends.
    pub fn finish(&self) -> Result<(), ClientError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ClientError::validation(
                "run stream ended inside a UTF-8 sequence",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_chunks_pass_through() {
        let mut decoder = Utf8ChunkDecoder::default();
        assert_eq!(decoder.push_chunk(b"hello").expect("decode"), "hello");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn a_split_multibyte_sequence_is_buffered() {
        let text = "héllo";
        let bytes = text.as_bytes();
        // Split inside the two-byte 'é'.
        let mut decoder = Utf8ChunkDecoder::default();
        let first = decoder.push_chunk(&bytes[..2]).expect("decode");
        assert_eq!(first, "h");
        let second = decoder.push_chunk(&bytes[2..]).expect("decode");
        assert_eq!(second, "éllo");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn invalid_bytes_are_a_validation_error() {
        let mut decoder = Utf8ChunkDecoder::default();
        let err = decoder.push_chunk(&[0xff, 0xfe]).expect_err("must reject");
        assert!(matches!(err, ClientError::Validation { .. }));
    }

    #[test]
    fn a_dangling_tail_fails_at_finish() {
        let mut decoder = Utf8ChunkDecoder::default();
        let fragment = decoder.push_chunk(&[0xc3]).expect("decode");
        assert!(fragment.is_empty());
        assert!(decoder.finish().is_err());
    }
}
