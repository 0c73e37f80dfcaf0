//! PCM sample conversion and transport text encoding
//!
//! Audio lives in-process as `f32` samples in `[-1.0, 1.0]` and travels on
//! the wire as 16-bit little-endian PCM wrapped in base64 text.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Capture sample rate (16kHz mono speech input)
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Playback sample rate of synthesized speech (24kHz mono)
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Media type declared on every outbound audio unit
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Scale factor between `f32` and `i16` samples
const PCM16_SCALE: f32 = 32768.0;

/// Convert `f32` samples to 16-bit little-endian PCM bytes
///
/// Samples are clamped to `[-1.0, 1.0]`, scaled by 32768 and truncated
/// toward zero; `1.0` saturates to `i16::MAX`. No dithering.
#[must_use]
pub fn float_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // `as` truncates toward zero and saturates at the i16 bounds
        #[allow(clippy::cast_possible_truncation)]
        let value = (sample.clamp(-1.0, 1.0) * PCM16_SCALE) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert 16-bit little-endian PCM bytes to `f32` samples
///
/// Produces `bytes.len() / 2` samples; a trailing odd byte is ignored.
#[must_use]
pub fn pcm16_to_float(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| f32::from(i16::from_le_bytes([pair[0], pair[1]])) / PCM16_SCALE)
        .collect()
}

/// Encode bytes as transport text (standard base64)
#[must_use]
pub fn bytes_to_transport_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode transport text (standard base64) back to bytes
///
/// # Errors
///
/// Returns [`Error::Decode`] if the text is not valid base64
pub fn transport_text_to_bytes(text: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(text)
        .map_err(|e| Error::Decode(format!("invalid base64 payload: {e}")))
}

/// Decode one streamed audio fragment into playable samples
///
/// Unlike [`pcm16_to_float`] this rejects odd byte counts, since a
/// truncated sample means the fragment was corrupted in transit.
///
/// # Errors
///
/// Returns [`Error::Decode`] on invalid base64 or odd byte length
pub fn decode_fragment(text: &str) -> Result<Vec<f32>> {
    let bytes = transport_text_to_bytes(text)?;
    if bytes.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "fragment has odd byte length {}",
            bytes.len()
        )));
    }
    Ok(pcm16_to_float(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_text_roundtrip_any_length() {
        for len in 0..=9u8 {
            let bytes: Vec<u8> = (0..len).map(|i| i.wrapping_mul(37).wrapping_add(200)).collect();
            let text = bytes_to_transport_text(&bytes);
            assert_eq!(transport_text_to_bytes(&text).unwrap(), bytes);
        }
    }

    #[test]
    fn test_empty_roundtrip() {
        assert_eq!(bytes_to_transport_text(&[]), "");
        assert!(transport_text_to_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_pcm_roundtrip_within_quantization_error() {
        let samples: Vec<f32> = (0..2000)
            .map(|i| ((i as f32) * 0.013).sin() * 0.97)
            .collect();
        let decoded = pcm16_to_float(&float_to_pcm16(&samples));
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{a} vs {b}");
        }
    }

    #[test]
    fn test_extremes_saturate() {
        let bytes = float_to_pcm16(&[1.0, -1.0, 2.5, -3.0, 0.0]);
        let values: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|p| i16::from_le_bytes([p[0], p[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN, 0]);
    }

    #[test]
    fn test_little_endian_layout() {
        // 0.5 * 32768 = 16384 = 0x4000
        assert_eq!(float_to_pcm16(&[0.5]), vec![0x00, 0x40]);
        assert_eq!(pcm16_to_float(&[0x00, 0xC0]), vec![-0.5]);
    }

    #[test]
    fn test_truncates_toward_zero() {
        // 0.00005 * 32768 = 1.6384 -> 1
        let bytes = float_to_pcm16(&[0.00005, -0.00005]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 1);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -1);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        assert_eq!(pcm16_to_float(&[0x00, 0x40, 0x7F]).len(), 1);
    }

    #[test]
    fn test_decode_fragment_rejects_bad_input() {
        assert!(matches!(decode_fragment("!!not base64!!"), Err(Error::Decode(_))));
        let odd = bytes_to_transport_text(&[1, 2, 3]);
        assert!(matches!(decode_fragment(&odd), Err(Error::Decode(_))));
        let ok = bytes_to_transport_text(&[0, 0, 0, 0x40]);
        assert_eq!(decode_fragment(&ok).unwrap(), vec![0.0, 0.5]);
    }
}
