//! Interleaved/planar buffer conversion helpers.

// -------------------------------------------------------------------------------------------------

/// Set all samples in the given buffer to zero.
pub fn clear_buffer(buffer: &mut [f32]) {
    buffer.fill(0.0);
}

// -------------------------------------------------------------------------------------------------

/// Downmix an interleaved buffer to a mono one by averaging all channels per frame.
/// The mono buffer's length defines the number of frames that are converted.
pub fn interleaved_to_mono(interleaved: &[f32], channel_count: usize, mono: &mut [f32]) {
    debug_assert!(channel_count > 0, "Invalid channel count");
    debug_assert!(
        interleaved.len() >= mono.len() * channel_count,
        "Invalid buffer layout"
    );
    match channel_count {
        1 => mono.copy_from_slice(&interleaved[..mono.len()]),
        2 => {
            for (frame_index, value) in mono.iter_mut().enumerate() {
                *value = 0.5 * (interleaved[frame_index * 2] + interleaved[frame_index * 2 + 1]);
            }
        }
        _ => {
            let scale = 1.0 / channel_count as f32;
            for (frame_index, value) in mono.iter_mut().enumerate() {
                let frame = &interleaved[frame_index * channel_count..][..channel_count];
                *value = frame.iter().sum::<f32>() * scale;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Copy a single channel out of an interleaved buffer.
pub fn interleaved_to_channel(
    interleaved: &[f32],
    channel_count: usize,
    channel: usize,
    out: &mut Vec<f32>,
) {
    debug_assert!(channel < channel_count, "Invalid channel index");
    out.clear();
    out.extend(
        interleaved
            .iter()
            .skip(channel)
            .step_by(channel_count)
            .copied(),
    );
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono_downmix() {
        let stereo = [1.0, 3.0, 2.0, 4.0];
        let mut mono = [0.0; 2];
        interleaved_to_mono(&stereo, 2, &mut mono);
        assert_eq!(mono, [2.0, 3.0]);

        let mono_src = [1.0, 2.0, 3.0];
        let mut mono_dst = [0.0; 3];
        interleaved_to_mono(&mono_src, 1, &mut mono_dst);
        assert_eq!(mono_dst, mono_src);
    }

    #[test]
    fn channel_extract() {
        let stereo = [1.0, 3.0, 2.0, 4.0];
        let mut channel = Vec::new();
        interleaved_to_channel(&stereo, 2, 0, &mut channel);
        assert_eq!(channel, vec![1.0, 2.0]);
        interleaved_to_channel(&stereo, 2, 1, &mut channel);
        assert_eq!(channel, vec![3.0, 4.0]);
    }
}
