//! Docker attach stream frame codec.
//!
//! Docker multiplexes stdout/stderr over the attach stream with an 8-byte
//! header per frame: `[stream_type, 0, 0, 0, size_be_u32]` followed by
//! `size` bytes of payload. `decode_frames` is a pure function: it consumes
//! as many complete frames as the buffer holds and reports how many bytes
//! it used, leaving any trailing partial frame for the next call.

const HEADER_LEN: usize = 8;

const STREAM_STDIN: u8 = 0;
const STREAM_STDOUT: u8 = 1;
const STREAM_STDERR: u8 = 2;

/// Decode as many complete Docker attach frames as `buf` holds.
///
/// Returns the concatenated stdout (and stdin-echo) payload text, and the
/// number of bytes consumed from `buf`. stderr payloads are discarded.
/// If the first byte isn't a recognised stream kind, the remainder of the
/// buffer is treated as raw unframed text (graceful degradation).
pub fn decode_frames(buf: &[u8]) -> (String, usize) {
    let mut out = String::new();
    let mut pos = 0;

    while pos < buf.len() {
        if pos + HEADER_LEN > buf.len() {
            break;
        }

        let stream_type = buf[pos];
        if !matches!(stream_type, STREAM_STDIN | STREAM_STDOUT | STREAM_STDERR) {
            out.push_str(&String::from_utf8_lossy(&buf[pos..]));
            pos = buf.len();
            break;
        }

        let size = u32::from_be_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]) as usize;

        if pos + HEADER_LEN + size > buf.len() {
            break;
        }

        if size > 0 && matches!(stream_type, STREAM_STDIN | STREAM_STDOUT) {
            let payload = &buf[pos + HEADER_LEN..pos + HEADER_LEN + size];
            out.push_str(&String::from_utf8_lossy(payload));
        }

        pos += HEADER_LEN + size;
    }

    (out, pos)
}

/// Encode a frame header for tests and for any raw-socket attach path that
/// needs to emit the same wire format it reads.
#[cfg(test)]
fn encode_frame(stream_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.push(stream_type);
    frame.extend_from_slice(&[0, 0, 0]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_stdout_frame() {
        let frame = encode_frame(STREAM_STDOUT, b"hello\n");
        let (text, consumed) = decode_frames(&frame);
        assert_eq!(text, "hello\n");
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn discards_stderr_payload() {
        let frame = encode_frame(STREAM_STDERR, b"warning: noisy library\n");
        let (text, consumed) = decode_frames(&frame);
        assert_eq!(text, "");
        assert_eq!(consumed, frame.len());
    }

    #[test]
    fn stops_at_partial_header() {
        let frame = encode_frame(STREAM_STDOUT, b"hi");
        let partial = &frame[..5];
        let (text, consumed) = decode_frames(partial);
        assert_eq!(text, "");
        assert_eq!(consumed, 0);
    }

    #[test]
    fn stops_at_partial_payload() {
        let frame = encode_frame(STREAM_STDOUT, b"hello world");
        let partial = &frame[..HEADER_LEN + 3];
        let (text, consumed) = decode_frames(partial);
        assert_eq!(text, "");
        assert_eq!(consumed, 0);
    }

    #[test]
    fn falls_back_to_raw_text_on_bad_kind() {
        let mut buf = vec![9, 0, 0, 0, 0, 0, 0, 0];
        buf.extend_from_slice(b"not really framed");
        let (text, consumed) = decode_frames(&buf);
        assert_eq!(consumed, buf.len());
        assert!(text.contains("not really framed"));
    }

    // P7: decoding is pure (idempotent on repeated calls with the same input).
    #[test]
    fn decode_is_pure() {
        let frame = encode_frame(STREAM_STDOUT, b"pure\n");
        assert_eq!(decode_frames(&frame), decode_frames(&frame));
    }

    // P7: splitting the input across two calls, with the remainder carried
    // forward, yields the same text as decoding it all at once.
    #[test]
    fn decode_is_split_invariant() {
        let mut whole = Vec::new();
        whole.extend(encode_frame(STREAM_STDOUT, b"first "));
        whole.extend(encode_frame(STREAM_STDOUT, b"second"));

        let (all_at_once, _) = decode_frames(&whole);

        for split in 1..whole.len() {
            let (b1, b2) = whole.split_at(split);

            let (mut text, consumed1) = decode_frames(b1);
            let mut residue = b1[consumed1..].to_vec();
            residue.extend_from_slice(b2);
            let (text2, consumed2) = decode_frames(&residue);
            text.push_str(&text2);
            assert_eq!(residue[consumed2..].len(), 0, "split at {split} left a dangling frame");

            assert_eq!(text, all_at_once, "split at {split} produced different text");
        }
    }

    #[test]
    fn multiple_frames_in_one_buffer() {
        let mut buf = Vec::new();
        buf.extend(encode_frame(STREAM_STDOUT, b"{\"a\":1}\n"));
        buf.extend(encode_frame(STREAM_STDERR, b"ignored\n"));
        buf.extend(encode_frame(STREAM_STDOUT, b"{\"b\":2}\n"));

        let (text, consumed) = decode_frames(&buf);
        assert_eq!(text, "{\"a\":1}\n{\"b\":2}\n");
        assert_eq!(consumed, buf.len());
    }
}
