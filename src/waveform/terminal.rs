// src/waveform/terminal.rs

use super::Bar;

/// Draws bars into `height` text rows, one character per bar. Bars are
/// expected to come from a viewport whose height equals `height`.
///
/// Live snapshots carry mirrored pairs, so min and max are ordered here
/// rather than trusted.
pub fn render_ascii(bars: &[Bar], height: usize, playhead: Option<usize>) -> Vec<String> {
    let h = height.max(4);
    let centre = h / 2;
    let mut lines = vec![vec![' '; bars.len()]; h];
    let half = h as f32 / 2.0;
    let to_row = |v: f32| -> usize {
        let clamped = v.clamp(-half, half);
        let y = (half - clamped).round() as usize;
        y.min(h - 1)
    };
    for (x, bar) in bars.iter().enumerate() {
        let y1 = to_row(bar.max_height);
        let y0 = to_row(bar.min_height);
        let (a, b) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        if a == b {
            lines[centre][x] = '─';
            continue;
        }
        for row in lines.iter_mut().take(b + 1).skip(a) {
            row[x] = '█';
        }
    }
    if let Some(x) = playhead.filter(|&x| x < bars.len()) {
        for row in &mut lines {
            row[x] = '│';
        }
    }
    lines.into_iter().map(|row| row.into_iter().collect()).collect()
}

/// Merges bars into at most `width` groups, keeping each group's extremes.
/// Bars already within `width` are returned unchanged.
pub fn fit_width(bars: &[Bar], width: usize) -> Vec<Bar> {
    if width == 0 || bars.len() <= width {
        return bars.to_vec();
    }
    (0..width)
        .map(|x| {
            let start = x * bars.len() / width;
            let end = ((x + 1) * bars.len() / width).max(start + 1);
            let group = &bars[start..end];
            let (lo, hi) = group.iter().fold((f32::MAX, f32::MIN), |(lo, hi), b| {
                let (a, c) = (b.min_height.min(b.max_height), b.min_height.max(b.max_height));
                (lo.min(a), hi.max(c))
            });
            Bar {
                column: group[0].column,
                x: x as f32,
                min_height: lo,
                max_height: hi,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(min: f32, max: f32) -> Bar {
        Bar {
            column: 0,
            x: 0.0,
            min_height: min,
            max_height: max,
        }
    }

    #[test]
    fn silent_bar_draws_centre_line() {
        let lines = render_ascii(&[bar(0.0, 0.0)], 10, None);
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[5], "─");
        assert!(lines.iter().enumerate().all(|(i, l)| i == 5 || l == " "));
    }

    #[test]
    fn mirrored_bar_fills_symmetrically() {
        // Live pairs arrive as (v, -v).
        let lines = render_ascii(&[bar(3.0, -3.0)], 10, None);
        let filled: Vec<usize> = (0..10).filter(|&i| lines[i] == "█").collect();
        assert_eq!(filled, vec![2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn fit_width_keeps_extremes() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(-(i as f32), i as f32)).collect();
        let fitted = fit_width(&bars, 5);
        assert_eq!(fitted.len(), 5);
        assert_eq!(fitted[0].min_height, -1.0);
        assert_eq!(fitted[4].max_height, 9.0);
        assert_eq!(fit_width(&bars, 20).len(), 10);
    }

    #[test]
    fn playhead_overrides_column() {
        let lines = render_ascii(&[bar(0.0, 0.0), bar(-1.0, 1.0)], 6, Some(1));
        assert!(lines.iter().all(|l| l.ends_with('│')));
    }
}
