use super::RobotId;

pub const HEADER_LEN: usize = 10;

/// `identity(6) ∥ u32 LE millis-since-start ∥ payload`
pub fn encode_frame(id: &RobotId, millis: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&id.bytes());
    frame.extend_from_slice(&millis.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub fn decode_frame(frame: &[u8]) -> Option<([u8; 6], u32, &[u8])> {
    if frame.len() < HEADER_LEN {
        return None;
    }
    let mut id = [0u8; 6];
    id.copy_from_slice(&frame[..6]);
    let millis = u32::from_le_bytes([frame[6], frame[7], frame[8], frame[9]]);
    Some((id, millis, &frame[HEADER_LEN..]))
}

pub fn read_i16_le(buf: &[u8], offset: usize) -> Option<i16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(i16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub fn push_i16_le(buf: &mut Vec<u8>, value: i16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn push_i32_le(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_roundtrip() {
        let id = RobotId::from_raw([0xaa, 0xbb, 0xcc, 0xdd, 0x4a, 0x21]);
        let frame = encode_frame(&id, 0x01020304, &[b'S', 1, 2]);

        assert_eq!(frame.len(), HEADER_LEN + 3);
        assert_eq!(&frame[..6], &id.bytes());
        // Little-endian timestamp.
        assert_eq!(&frame[6..10], &[0x04, 0x03, 0x02, 0x01]);

        let (decoded_id, millis, payload) = decode_frame(&frame).unwrap();
        assert_eq!(decoded_id, id.bytes());
        assert_eq!(millis, 0x01020304);
        assert_eq!(payload, &[b'S', 1, 2]);
    }

    #[test]
    fn short_frames_are_rejected() {
        assert!(decode_frame(&[0u8; 9]).is_none());
        assert!(decode_frame(&[]).is_none());
    }

    #[test]
    fn scalar_readers_handle_bounds() {
        let buf = [0x10, 0x27];
        assert_eq!(read_i16_le(&buf, 0), Some(10000));
        assert_eq!(read_i16_le(&buf, 1), None);
        assert_eq!(read_u16_le(&buf, 0), Some(10000));
    }
}
