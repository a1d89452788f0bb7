// PCM codec helpers shared by the capture and playback paths
//
// Conversions between normalised f32 samples, 16-bit little-endian PCM bytes
// and the base64 text encoding used on the wire. All functions are pure.

use base64::Engine;

use crate::error::{CallError, Result};

/// Convert normalised f32 samples to 16-bit little-endian PCM bytes
///
/// Samples are clamped to [-1.0, 1.0]; negative values scale by 32768 and
/// positive values by 32767 so both ends of the range are reachable.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            let v = if s < 0.0 {
                s * 32768.0
            } else {
                s * i16::MAX as f32
            };
            (v as i16).to_le_bytes()
        })
        .collect()
}

/// Convert 16-bit little-endian PCM bytes to normalised f32 samples
pub fn pcm16_to_f32(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 2 != 0 {
        return Err(CallError::decode(format!(
            "PCM payload has odd length {}",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Encode bytes for transport
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode transport text back to bytes
pub fn decode_base64(text: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CallError::decode(format!("invalid base64: {}", e)))
}

/// Root-mean-square amplitude of a sample buffer (0.0 for an empty buffer)
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Multiply every sample by `gain` in place
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_pcm16_extremes() {
        let bytes = f32_to_pcm16(&[-1.0, 0.0, 1.0]);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), i16::MAX);
    }

    #[test]
    fn test_f32_to_pcm16_clamps_out_of_range() {
        let bytes = f32_to_pcm16(&[2.5, -3.0, f32::NAN]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn test_pcm16_to_f32_rejects_odd_length() {
        let err = pcm16_to_f32(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, CallError::Decode { .. }));
    }

    #[test]
    fn test_pcm16_to_f32_values() {
        let bytes: Vec<u8> = [i16::MIN, 0, 16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let samples = pcm16_to_f32(&bytes).unwrap();
        assert_eq!(samples, vec![-1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_decode_base64_rejects_garbage() {
        assert!(decode_base64("not base64!!").is_err());
        assert_eq!(decode_base64("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 64]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_apply_gain_mutes() {
        let mut samples = vec![0.3, -0.7, 1.0];
        apply_gain(&mut samples, 0.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
