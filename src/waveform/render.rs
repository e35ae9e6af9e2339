// src/waveform/render.rs

use std::time::Duration;

use super::Waveform;

/// Drawing surface parameters. Heights come back in the same unit as
/// `height`, measured from the centre line (positive is up).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub pixels_per_column: f32,
    pub scale: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(pixels_per_column: f32, scale: f32, height: f32) -> Self {
        Self {
            pixels_per_column,
            scale,
            height,
        }
    }
}

/// One drawable column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    /// Column index in the source waveform.
    pub column: u32,
    /// Left edge relative to the start of the rendered range.
    pub x: f32,
    pub min_height: f32,
    pub max_height: f32,
}

/// Maps the columns of `waveform` that fall in `[start, start + duration)`
/// onto bars. Pure: the same inputs always give the same bars, so live
/// snapshots and decoded files share this path.
pub fn render(waveform: &Waveform, start: Duration, duration: Duration, viewport: &Viewport) -> Vec<Bar> {
    let length = waveform.length() as u64;
    let first = waveform.column_at(start).min(length);
    let end = waveform.column_end(start.saturating_add(duration)).min(length);
    if first >= end {
        return Vec::new();
    }

    let half = viewport.height.max(0.0) / 2.0;
    let gain = viewport.scale * half / waveform.full_scale();
    let to_height = |sample: i16| (sample as f32 * gain).clamp(-half, half);

    waveform.data()[2 * first as usize..2 * end as usize]
        .chunks_exact(2)
        .zip(first..)
        .map(|(pair, column)| {
            Bar {
                column: column as u32,
                x: (column - first) as f32 * viewport.pixels_per_column,
                min_height: to_height(pair[0]),
                max_height: to_height(pair[1]),
            }
        })
        .collect()
}

/// Renders the whole waveform.
pub fn render_all(waveform: &Waveform, viewport: &Viewport) -> Vec<Bar> {
    render(waveform, Duration::ZERO, waveform.duration(), viewport)
}

/// Renders at most the last `columns` columns, the view a scrolling live
/// preview wants.
pub fn render_tail(waveform: &Waveform, columns: usize, viewport: &Viewport) -> Vec<Bar> {
    let length = waveform.length() as u64;
    let first = length.saturating_sub(columns as u64);
    let start = waveform.time_at(first);
    render(waveform, start, waveform.duration().saturating_sub(start), viewport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::waveform::FLAG_8_BIT;

    fn ramp(length: usize) -> Waveform {
        let data = (0..length)
            .map(|i| (i % 300) as i16 * 100)
            .flat_map(|v| [-v, v])
            .collect();
        Waveform::new(1, 0, 44_100, 256, data).unwrap()
    }

    #[test]
    fn full_duration_yields_every_column_once() {
        let wf = ramp(1723);
        let bars = render_all(&wf, &Viewport::new(1.0, 1.0, 100.0));

        assert_eq!(bars.len(), 1723);
        for (i, bar) in bars.iter().enumerate() {
            assert_eq!(bar.column as usize, i);
            assert_eq!(bar.x, i as f32);
        }
    }

    #[test]
    fn adjacent_windows_do_not_overlap() {
        let wf = ramp(300);
        let vp = Viewport::new(2.0, 1.0, 100.0);
        let split = wf.time_at(120);

        let left = render(&wf, Duration::ZERO, split, &vp);
        let right = render(&wf, split, wf.duration() - split, &vp);

        assert_eq!(left.len(), 120);
        assert_eq!(right.len(), 180);
        assert_eq!(left.last().unwrap().column + 1, right[0].column);
        assert_eq!(right[0].x, 0.0);
        assert_eq!(right[1].x, 2.0);
    }

    #[test]
    fn heights_scale_and_clip() {
        let wf = Waveform::new(1, 0, 44_100, 256, vec![-16_384, 16_384, i16::MIN, i16::MAX]).unwrap();

        let bars = render_all(&wf, &Viewport::new(1.0, 1.0, 10.0));
        assert_eq!(bars[0].min_height, -2.5);
        assert_eq!(bars[0].max_height, 2.5);

        let loud = render_all(&wf, &Viewport::new(1.0, 4.0, 10.0));
        assert_eq!(loud[1].min_height, -5.0);
        assert_eq!(loud[1].max_height, 5.0);
    }

    #[test]
    fn eight_bit_uses_its_own_full_scale() {
        let wf = Waveform::new(1, FLAG_8_BIT, 44_100, 256, vec![-64, 64]).unwrap();
        let bars = render_all(&wf, &Viewport::new(1.0, 1.0, 10.0));
        assert_eq!(bars[0].max_height, 2.5);
    }

    #[test]
    fn range_past_the_end_is_empty() {
        let wf = ramp(10);
        let vp = Viewport::new(1.0, 1.0, 10.0);
        assert!(render(&wf, wf.duration(), Duration::from_secs(5), &vp).is_empty());
        assert!(render(&wf, Duration::ZERO, Duration::ZERO, &vp).is_empty());
    }

    #[test]
    fn open_ended_range_runs_to_the_end() {
        let wf = ramp(10);
        let vp = Viewport::new(1.0, 1.0, 10.0);
        let bars = render(&wf, Duration::from_millis(1), Duration::MAX, &vp);
        assert_eq!(bars.len(), 10);
        assert_eq!(bars[0].column, 0);
        assert!(render(&wf, Duration::MAX, Duration::MAX, &vp).is_empty());
    }

    #[test]
    fn same_inputs_same_bars() {
        let wf = ramp(50);
        let vp = Viewport::new(3.0, 2.0, 40.0);
        let a = render(&wf, wf.time_at(5), wf.time_at(20), &vp);
        let b = render(&wf, wf.time_at(5), wf.time_at(20), &vp);
        assert_eq!(a, b);
    }

    #[test]
    fn tail_keeps_latest_columns() {
        let wf = ramp(250);
        let bars = render_tail(&wf, 120, &Viewport::new(1.0, 1.0, 10.0));
        assert_eq!(bars.len(), 120);
        assert_eq!(bars[0].column, 130);
        assert_eq!(bars.last().unwrap().column, 249);
    }
}
