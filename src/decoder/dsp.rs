// src/decoder/dsp.rs

/// Re-maps interleaved frames from `in_ch` to `out_ch` channels.
pub fn updown_mix_interleaved(input: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return input.to_vec();
    }
    let frames = input.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    match (in_ch, out_ch) {
        (1, _) => {
            for f in 0..frames {
                out[f * out_ch..(f + 1) * out_ch].fill(input[f]);
            }
        }
        _ if out_ch < in_ch => {
            let factor = in_ch as f32 / out_ch as f32;
            for f in 0..frames {
                for oc in 0..out_ch {
                    let start = (oc as f32 * factor).floor() as usize;
                    let end = (((oc + 1) as f32 * factor).ceil() as usize).min(in_ch);
                    let group = &input[f * in_ch + start..f * in_ch + end];
                    out[f * out_ch + oc] = if group.is_empty() {
                        0.0
                    } else {
                        group.iter().sum::<f32>() / group.len() as f32
                    };
                }
            }
        }
        _ => {
            for f in 0..frames {
                for oc in 0..out_ch {
                    out[f * out_ch + oc] = input[f * in_ch + oc % in_ch];
                }
            }
        }
    }

    out
}

/// Averages each interleaved frame down to one sample.
pub fn mono_frames(input: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    let channels = channels.max(1);
    input
        .chunks_exact(channels)
        .map(move |frame| frame.iter().sum::<f32>() / channels as f32)
}
