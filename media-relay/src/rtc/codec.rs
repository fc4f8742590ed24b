//! G.711 mu-law for the audio track: downmix to mono, decimate to 8 kHz,
//! then compand.

use bytes::Bytes;

pub const PCMU_SAMPLE_RATE: u32 = 8000;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut magnitude = sample as i32;
    let sign = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    magnitude = magnitude.min(CLIP) + BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && magnitude & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (magnitude >> (exponent + 3)) & 0x0f;
    !((sign | (exponent << 4) | mantissa) as u8)
}

/// Interleaved s16le to mono samples, averaging channels.
pub fn downmix(samples: &[u8], channels: u16) -> Vec<i16> {
    let channels = channels.max(1) as usize;
    samples
        .chunks_exact(2 * channels)
        .map(|frame| {
            let sum: i32 = frame
                .chunks_exact(2)
                .map(|s| i16::from_le_bytes([s[0], s[1]]) as i32)
                .sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Box-filter decimation from `from_rate` to `to_rate`. Upsampling is not
/// supported; the input is returned unchanged.
pub fn decimate(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if to_rate == 0 || from_rate <= to_rate {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    (0..out_len)
        .map(|i| {
            let start = i * samples.len() / out_len;
            let end = ((i + 1) * samples.len() / out_len).max(start + 1);
            let window = &samples[start..end];
            let sum: i32 = window.iter().map(|s| *s as i32).sum();
            (sum / window.len() as i32) as i16
        })
        .collect()
}

/// One chunk of interleaved s16le PCM as 8 kHz mono mu-law.
pub fn encode_pcmu(samples: &[u8], sample_rate: u32, channels: u16) -> Bytes {
    let mono = downmix(samples, channels);
    let narrow = decimate(&mono, sample_rate, PCMU_SAMPLE_RATE);
    narrow.into_iter().map(linear_to_ulaw).collect()
}
