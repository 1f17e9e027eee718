//! 16 kHz → 24 kHz mono PCM16 upsampling by linear interpolation.
//!
//! The conference SDK delivers 10 ms frames at 16 kHz (160 samples); the
//! avatar expects 24 kHz, so every input frame becomes 240 samples.

/// Converts little-endian PCM16 bytes to samples. A trailing odd byte is
/// ignored.
pub fn pcm_bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Converts samples to little-endian PCM16 bytes.
pub fn samples_to_pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Upsamples mono PCM16 from 16 kHz to 24 kHz (3:2 ratio).
///
/// Each input sample lands at output index `3i/2`; between consecutive
/// inputs one interpolated sample `(x[i] + 2·x[i+1])/3` is inserted, and
/// every even-indexed pair gets a second `(x[i] + x[i+1])/2` sample. The
/// output length is `⌈3n/2⌉` and the first and last input samples are
/// carried through. Arithmetic stays in i32, so peak-amplitude input
/// cannot overflow.
pub fn upsample_16k_to_24k(input: &[i16]) -> Vec<i16> {
    if input.is_empty() {
        return Vec::new();
    }
    if input.len() == 1 {
        return vec![input[0], input[0]];
    }

    let out_len = (input.len() * 3 + 1) / 2;
    let mut output = vec![0i16; out_len];

    for i in 0..input.len() - 1 {
        let out_idx = i * 3 / 2;
        let a = input[i] as i32;
        let b = input[i + 1] as i32;

        output[out_idx] = input[i];
        if out_idx + 1 < out_len {
            output[out_idx + 1] = ((a + 2 * b) / 3) as i16;
        }
        if i % 2 == 0 && out_idx + 2 < out_len {
            output[out_idx + 2] = ((a + b) / 2) as i16;
        }
    }

    // Odd-length input leaves one slot before the tail unwritten; fill it
    // with the midpoint of the final pair.
    if input.len() % 2 == 1 {
        let a = input[input.len() - 2] as i32;
        let b = input[input.len() - 1] as i32;
        output[out_len - 2] = ((a + b) / 2) as i16;
    }

    output[out_len - 1] = input[input.len() - 1];
    output
}
