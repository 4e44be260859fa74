//! Detector frame wire format
//!
//! One JSON object per frame:
//! `{"width":W,"height":H,"detections":[{"track_id","box":[x1,y1,x2,y2],"class_id","confidence"}],"preview":"<base64>"}`

use crate::domain::types::{DetectorFrame, MAX_FRAME_DIMENSION};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::de::Error as _;

/// Parse one detector payload
///
/// Frames with a side above `MAX_FRAME_DIMENSION` are rejected like any other
/// malformed payload.
pub fn parse_frame(payload: &[u8]) -> serde_json::Result<DetectorFrame> {
    let frame: DetectorFrame = serde_json::from_slice(payload)?;
    if frame.width > MAX_FRAME_DIMENSION || frame.height > MAX_FRAME_DIMENSION {
        return Err(serde_json::Error::custom(format!(
            "frame {}x{} exceeds {MAX_FRAME_DIMENSION} pixels per side",
            frame.width, frame.height
        )));
    }
    Ok(frame)
}

/// Decode the base64 preview carried by a frame
pub fn decode_preview(encoded: &str) -> Result<Bytes, base64::DecodeError> {
    STANDARD.decode(encoded.trim()).map(Bytes::from)
}

/// Encode preview bytes for embedding in a frame
pub fn encode_preview(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BoxXyxy, ClassId, TrackId};

    #[test]
    fn test_parse_full_frame() {
        let json = br#"{"width":1020,"height":500,"detections":[
            {"track_id":7,"box":[10,20,110,90],"class_id":2,"confidence":0.81}
        ]}"#;
        let frame = parse_frame(json).unwrap();
        assert_eq!((frame.width, frame.height), (1020, 500));
        assert_eq!(frame.detections.len(), 1);
        let det = &frame.detections[0];
        assert_eq!(det.track_id, TrackId(7));
        assert_eq!(det.bbox, BoxXyxy::new(10, 20, 110, 90));
        assert_eq!(det.class_id, ClassId(2));
        assert!(frame.preview.is_none());
    }

    #[test]
    fn test_missing_detections_is_empty_frame() {
        let frame = parse_frame(br#"{"width":640,"height":480}"#).unwrap();
        assert!(frame.detections.is_empty());
    }

    #[test]
    fn test_malformed_payloads_rejected() {
        assert!(parse_frame(b"not json").is_err());
        assert!(parse_frame(br#"{"height":480}"#).is_err());
        // Box with three coordinates
        assert!(parse_frame(
            br#"{"width":1,"height":1,"detections":[{"track_id":1,"box":[0,0,1],"class_id":2,"confidence":0.9}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_preview_decoding() {
        let encoded = encode_preview(b"\xff\xd8jpeg");
        let frame_json = format!(r#"{{"width":2,"height":2,"preview":"{encoded}"}}"#);
        let frame = parse_frame(frame_json.as_bytes()).unwrap();
        let bytes = decode_preview(frame.preview.as_deref().unwrap()).unwrap();
        assert_eq!(&bytes[..], b"\xff\xd8jpeg");

        assert!(decode_preview("***").is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let wide = br#"{"width":2147483648,"height":1,"detections":[
            {"track_id":1,"box":[0,0,10,10],"class_id":2,"confidence":0.9}
        ]}"#;
        assert!(parse_frame(wide).is_err());
        assert!(parse_frame(br#"{"width":640,"height":4000000000}"#).is_err());

        let edge = format!(r#"{{"width":{MAX_FRAME_DIMENSION},"height":{MAX_FRAME_DIMENSION}}}"#);
        assert!(parse_frame(edge.as_bytes()).is_ok());
    }
}
