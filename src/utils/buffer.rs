//! Helpers to process per-block float sample buffers.

// -------------------------------------------------------------------------------------------------

/// Amplitude below which a sample is considered silent.
pub const SILENCE_THRESHOLD: f32 = 1.0e-8;

// -------------------------------------------------------------------------------------------------

/// Set all values in the given buffer to zero.
#[inline]
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

/// Add `source` to `target`, sample by sample.
#[inline]
pub fn add_buffers(target: &mut [f32], source: &[f32]) {
    for (t, s) in target.iter_mut().zip(source) {
        *t += *s;
    }
}

/// Add `source` scaled by `gain` to `target`.
#[inline]
pub fn add_buffers_scaled(target: &mut [f32], source: &[f32], gain: f32) {
    for (t, s) in target.iter_mut().zip(source) {
        *t += *s * gain;
    }
}

/// Multiply all samples in the buffer with the given gain.
#[inline]
pub fn scale_buffer(buffer: &mut [f32], gain: f32) {
    if gain != 1.0 {
        for s in buffer.iter_mut() {
            *s *= gain;
        }
    }
}

/// Returns true if no sample in the given buffer exceeds [`SILENCE_THRESHOLD`].
pub fn is_silent(buffer: &[f32]) -> bool {
    buffer.iter().all(|s| s.abs() <= SILENCE_THRESHOLD)
}

// -------------------------------------------------------------------------------------------------

/// Copy `frames` frames from the interleaved buffer into the planar one, starting at the given
/// planar frame offset. The planar buffer's channel count defines the interleaved layout.
pub fn interleaved_to_planar(
    interleaved: &[f32],
    planar: &mut [Vec<f32>],
    offset: usize,
    frames: usize,
) {
    let channel_count = planar.len();
    if channel_count == 1 {
        planar[0][offset..offset + frames].copy_from_slice(&interleaved[..frames]);
        return;
    }
    for (channel_index, channel) in planar.iter_mut().enumerate() {
        let target = &mut channel[offset..offset + frames];
        for (value, frame) in target
            .iter_mut()
            .zip(interleaved.chunks_exact(channel_count))
        {
            *value = frame[channel_index];
        }
    }
}

/// Write a stereo planar pair into an interleaved buffer with the given channel count.
/// Mono targets receive the average of both channels.
pub fn stereo_to_interleaved(left: &[f32], right: &[f32], interleaved: &mut [f32], channels: usize) {
    match channels {
        1 => {
            for ((o, l), r) in interleaved.iter_mut().zip(left).zip(right) {
                *o = (*l + *r) * 0.5;
            }
        }
        2 => {
            for ((frame, l), r) in interleaved.chunks_exact_mut(2).zip(left).zip(right) {
                frame[0] = *l;
                frame[1] = *r;
            }
        }
        _ => {
            for ((frame, l), r) in interleaved.chunks_exact_mut(channels).zip(left).zip(right) {
                frame[0] = *l;
                frame[1] = *r;
                frame[2..].fill(0.0);
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleaving() {
        let interleaved = [1.0, 4.0, 2.0, 3.0, 3.0, 2.0];
        let mut planar = vec![vec![0.0; 4], vec![0.0; 4]];
        interleaved_to_planar(&interleaved, &mut planar, 1, 3);
        assert_eq!(planar[0], vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(planar[1], vec![0.0, 4.0, 3.0, 2.0]);

        let mut stereo = [0.0; 6];
        stereo_to_interleaved(&planar[0][1..], &planar[1][1..], &mut stereo, 2);
        assert_eq!(stereo, interleaved);

        let mut mono = [0.0; 3];
        stereo_to_interleaved(&planar[0][1..], &planar[1][1..], &mut mono, 1);
        assert_eq!(mono, [2.5, 2.5, 2.5]);
    }

    #[test]
    fn silence() {
        let mut buffer = vec![0.0; 16];
        assert!(is_silent(&buffer));
        buffer[7] = 0.5;
        assert!(!is_silent(&buffer));
        scale_buffer(&mut buffer, 1e-9);
        assert!(is_silent(&buffer));
    }
}
