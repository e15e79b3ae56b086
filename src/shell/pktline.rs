//! Git packet-line framing: four hex digits giving the frame length
//! (the four digits included), then the payload. `0000` is a flush.

use thiserror::Error;

/// Largest frame git accepts, header included.
pub const MAX_FRAME_LEN: usize = 65520;
const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PktError {
    #[error("truncated packet-line")]
    Truncated,
    #[error("invalid packet-line length {0:?}")]
    InvalidLength(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PktLine<'a> {
    Flush,
    Data(&'a [u8]),
}

/// Frames `payload`, cutting it to the maximum frame size.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(MAX_FRAME_LEN - HEADER_LEN)];
    let length = payload.len() + HEADER_LEN;
    let mut frame = format!("{length:04x}").into_bytes();
    frame.extend_from_slice(payload);
    frame
}

/// The frame telling a git client the server refused: `ERR <message>\n`.
#[must_use]
pub fn error_frame(message: &str) -> Vec<u8> {
    let max = MAX_FRAME_LEN - HEADER_LEN - "ERR \n".len();
    let mut end = message.len().min(max);
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    encode(format!("ERR {}\n", &message[..end]).as_bytes())
}

/// Reads one frame off the front of `input`, returning it and the rest.
pub fn decode(input: &[u8]) -> Result<(PktLine<'_>, &[u8]), PktError> {
    let header = input.get(..HEADER_LEN).ok_or(PktError::Truncated)?;
    let header = std::str::from_utf8(header)
        .map_err(|_| PktError::InvalidLength(String::from_utf8_lossy(header).into_owned()))?;
    let length = usize::from_str_radix(header, 16)
        .map_err(|_| PktError::InvalidLength(header.to_string()))?;

    if length == 0 {
        return Ok((PktLine::Flush, &input[HEADER_LEN..]));
    }
    if length < HEADER_LEN || length > MAX_FRAME_LEN {
        return Err(PktError::InvalidLength(header.to_string()));
    }

    let frame = input.get(HEADER_LEN..length).ok_or(PktError::Truncated)?;
    Ok((PktLine::Data(frame), &input[length..]))
}

/// The message of an `ERR` frame, if `payload` is one.
#[must_use]
pub fn error_message(payload: &[u8]) -> Option<String> {
    let text = payload.strip_prefix(b"ERR ")?;
    let text = text.strip_suffix(b"\n").unwrap_or(text);
    Some(String::from_utf8_lossy(text).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_layout() {
        let frame = error_frame("foo");
        assert_eq!(frame, b"000bERR foo\n");
        assert_eq!(frame.len(), 15);
    }

    #[test]
    fn test_decode_recovers_payload() {
        let mut stream = error_frame("Repository is archived");
        stream.extend_from_slice(b"0000");

        let (line, rest) = decode(&stream).unwrap();
        let PktLine::Data(payload) = line else {
            panic!("expected data frame");
        };
        assert_eq!(error_message(payload).as_deref(), Some("Repository is archived"));
        assert_eq!(decode(rest).unwrap(), (PktLine::Flush, &b""[..]));
    }

    #[test]
    fn test_decode_rejects_bad_frames() {
        assert_eq!(decode(b"00"), Err(PktError::Truncated));
        assert_eq!(decode(b"000aERR"), Err(PktError::Truncated));
        assert!(matches!(decode(b"zzzz"), Err(PktError::InvalidLength(_))));
        assert!(matches!(decode(b"0002"), Err(PktError::InvalidLength(_))));
    }

    #[test]
    fn test_long_messages_are_cut_to_one_frame() {
        let frame = error_frame(&"é".repeat(40_000));
        assert!(frame.len() <= MAX_FRAME_LEN);
        let (PktLine::Data(payload), rest) = decode(&frame).unwrap() else {
            panic!("expected data frame");
        };
        assert!(rest.is_empty());
        assert!(payload.ends_with(b"\n"));
    }
}
