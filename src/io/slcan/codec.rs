// src/io/slcan/codec.rs
//
// slcan (Serial Line CAN) ASCII protocol codec.
//
// Protocol reference: http://www.can232.com/docs/can232_v3.pdf
//
// Frame formats:
//   Standard: t<ID:3hex><DLC:1hex><DATA:2hex*DLC>\r
//   Extended: T<ID:8hex><DLC:1hex><DATA:2hex*DLC>\r
//   RTR:      r<ID:3hex><DLC:1hex>\r / R<ID:8hex><DLC:1hex>\r

use crate::io::codec::FrameCodec;
use crate::io::error::IoError;
use crate::io::{FrameMessage, EXTENDED_ID_MAX, MAX_DLC, STANDARD_ID_MAX};

/// slcan (Serial Line CAN) ASCII protocol codec.
pub struct SlcanCodec;

impl SlcanCodec {
    /// True if the line is a received frame rather than a command reply
    /// (`z`/`Z` transmit acks, version strings, ...).
    pub fn is_frame_line(line: &str) -> bool {
        matches!(line.as_bytes().first(), Some(b't' | b'T' | b'r' | b'R'))
    }

    /// True for remote (RTR) frame lines
    pub fn is_remote_line(line: &str) -> bool {
        matches!(line.as_bytes().first(), Some(b'r' | b'R'))
    }
}

impl FrameCodec for SlcanCodec {
    /// Raw frame is an ASCII string (without trailing \r)
    type RawFrame = str;
    /// Encoded frame is a Vec<u8> (ASCII bytes with trailing \r)
    type EncodedFrame = Vec<u8>;

    /// Decode an slcan ASCII frame line.
    ///
    /// Examples:
    ///   `t1234AABBCCDD` -> Standard frame, ID=0x123, DLC=4, data=AA BB CC DD
    ///   `T123456782AABB` -> Extended frame, ID=0x12345678, DLC=2
    ///   `r1230` -> Standard RTR, ID=0x123, no data
    fn decode(line: &str) -> Result<FrameMessage, IoError> {
        let bytes = line.as_bytes();
        if bytes.is_empty() {
            return Err(IoError::protocol("slcan", "empty frame"));
        }

        let (is_extended, is_rtr) = match bytes[0] {
            b't' => (false, false),
            b'T' => (true, false),
            b'r' => (false, true),
            b'R' => (true, true),
            c => {
                return Err(IoError::protocol(
                    "slcan",
                    format!("invalid frame prefix: '{}'", c as char),
                ))
            }
        };

        let id_len = if is_extended { 8 } else { 3 };
        let min_len = 1 + id_len + 1; // prefix + ID + DLC

        if bytes.len() < min_len {
            return Err(IoError::protocol(
                "slcan",
                format!(
                    "frame too short: {} bytes, need at least {}",
                    bytes.len(),
                    min_len
                ),
            ));
        }

        let id_str = std::str::from_utf8(&bytes[1..1 + id_len])
            .map_err(|_| IoError::protocol("slcan", "invalid UTF-8 in frame ID"))?;
        let frame_id = u32::from_str_radix(id_str, 16)
            .map_err(|_| IoError::protocol("slcan", format!("invalid hex ID: {}", id_str)))?;

        let max_id = if is_extended { EXTENDED_ID_MAX } else { STANDARD_ID_MAX };
        if frame_id > max_id {
            return Err(IoError::protocol(
                "slcan",
                format!("ID out of range: 0x{:X}", frame_id),
            ));
        }

        let dlc_char = bytes[1 + id_len] as char;
        let dlc = dlc_char.to_digit(16).ok_or_else(|| {
            IoError::protocol("slcan", format!("invalid DLC character: '{}'", dlc_char))
        })? as usize;

        if dlc > MAX_DLC {
            return Err(IoError::protocol(
                "slcan",
                format!("invalid DLC: {} (max 8)", dlc),
            ));
        }

        let mut data = Vec::with_capacity(dlc);
        if !is_rtr && dlc > 0 {
            let data_start = 1 + id_len + 1;
            let expected_len = data_start + dlc * 2;

            if bytes.len() < expected_len {
                return Err(IoError::protocol(
                    "slcan",
                    format!(
                        "incomplete data: {} bytes, need {}",
                        bytes.len(),
                        expected_len
                    ),
                ));
            }

            for i in 0..dlc {
                let pair = &bytes[data_start + i * 2..data_start + i * 2 + 2];
                let byte_str = std::str::from_utf8(pair)
                    .map_err(|_| IoError::protocol("slcan", "invalid UTF-8 in data bytes"))?;
                let byte = u8::from_str_radix(byte_str, 16).map_err(|_| {
                    IoError::protocol("slcan", format!("invalid hex byte: {}", byte_str))
                })?;
                data.push(byte);
            }
        }

        Ok(FrameMessage::received(frame_id, &data, is_extended))
    }

    /// Encode a CAN frame to slcan ASCII format, including trailing `\r`.
    fn encode(frame: &FrameMessage) -> Result<Vec<u8>, IoError> {
        if frame.bytes.len() > MAX_DLC {
            return Err(IoError::protocol(
                "slcan",
                format!("data too long for slcan: {} bytes (max 8)", frame.bytes.len()),
            ));
        }

        let mut cmd = String::with_capacity(32);

        if frame.is_extended {
            cmd.push('T');
            cmd.push_str(&format!("{:08X}", frame.frame_id & EXTENDED_ID_MAX));
        } else {
            cmd.push('t');
            cmd.push_str(&format!("{:03X}", frame.frame_id & STANDARD_ID_MAX));
        }

        cmd.push_str(&format!("{:X}", frame.bytes.len()));

        for byte in &frame.bytes {
            cmd.push_str(&format!("{:02X}", byte));
        }

        cmd.push('\r');
        Ok(cmd.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Direction;

    #[test]
    fn test_slcan_decode_standard_frame() {
        let frame = SlcanCodec::decode("t1234AABBCCDD").unwrap();
        assert_eq!(frame.frame_id, 0x123);
        assert_eq!(frame.dlc(), 4);
        assert_eq!(frame.bytes, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(!frame.is_extended);
        assert_eq!(frame.direction, Direction::Rx);
    }

    #[test]
    fn test_slcan_decode_extended_frame() {
        let frame = SlcanCodec::decode("T123456782AABB").unwrap();
        assert_eq!(frame.frame_id, 0x12345678);
        assert_eq!(frame.bytes, vec![0xAA, 0xBB]);
        assert!(frame.is_extended);
    }

    #[test]
    fn test_slcan_decode_rtr_has_no_data() {
        let frame = SlcanCodec::decode("r1234").unwrap();
        assert_eq!(frame.frame_id, 0x123);
        assert!(frame.bytes.is_empty());
    }

    #[test]
    fn test_slcan_decode_rejects_bad_input() {
        assert!(SlcanCodec::decode("x1234AABB").is_err());
        assert!(SlcanCodec::decode("").is_err());
        assert!(SlcanCodec::decode("t123FAABBCCDD").is_err()); // DLC > 8
        assert!(SlcanCodec::decode("t1234AA").is_err()); // truncated
    }

    #[test]
    fn test_slcan_is_frame_line() {
        assert!(SlcanCodec::is_frame_line("t1230"));
        assert!(SlcanCodec::is_frame_line("R123456780"));
        assert!(!SlcanCodec::is_frame_line("z"));
        assert!(!SlcanCodec::is_frame_line("V1013"));
        assert!(!SlcanCodec::is_frame_line(""));
        assert!(SlcanCodec::is_remote_line("r1230"));
        assert!(!SlcanCodec::is_remote_line("T123456780"));
    }

    #[test]
    fn test_slcan_encode_standard_frame() {
        let frame = FrameMessage::new(0x123, &[0x01, 0x02, 0x03], false);
        assert_eq!(SlcanCodec::encode(&frame).unwrap(), b"t1233010203\r");
    }

    #[test]
    fn test_slcan_encode_extended_frame() {
        let frame = FrameMessage::new(0x12345678, &[0xAA, 0xBB], true);
        assert_eq!(SlcanCodec::encode(&frame).unwrap(), b"T123456782AABB\r");
    }

    #[test]
    fn test_slcan_encode_decode() {
        let original = FrameMessage::new(0x7FF, &[0xDE, 0xAD, 0xBE, 0xEF], false);
        let encoded = SlcanCodec::encode(&original).unwrap();
        let line = std::str::from_utf8(&encoded[..encoded.len() - 1]).unwrap();
        let decoded = SlcanCodec::decode(line).unwrap();

        assert_eq!(decoded.frame_id, original.frame_id);
        assert_eq!(decoded.bytes, original.bytes);
    }
}
