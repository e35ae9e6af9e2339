// tests/pipeline.rs

use std::path::Path;
use std::time::Duration;

use waveform_pipeline::config::{ExtractorConfig, PipelineConfig};
use waveform_pipeline::waveform::{Viewport, render, render_all, render_tail};
use waveform_pipeline::{AmplitudeSample, LivePreview, Waveform, WaveformExtractor, spawn_extraction};

fn write_wav(path: &Path, seconds: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * sample_rate as f32) as u32;
    for n in 0..frames {
        let t = n as f32 / sample_rate as f32;
        let envelope = (t * 3.0).sin().abs();
        let v = (std::f32::consts::TAU * 220.0 * t).sin() * envelope * 0.8;
        writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

#[tokio::test]
async fn amplitude_ticks_reach_the_live_view() {
    let config = PipelineConfig::default();
    let mut preview = LivePreview::new(config.sampler.clone(), &config.relay);
    assert!(preview.is_enabled());

    let readings = [-40.0, -12.0, -3.0, -60.0, -45.0];
    for db in readings {
        preview.on_amplitude(Some(AmplitudeSample::new(db, db)));
    }

    let mut live = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        live = preview.poll();
        // -45 + 40 = -5, inside the gate
        if live.as_ref().is_some_and(|wf| wf.column(248) == Some((-20, 20))) {
            break;
        }
    }
    let live = live.expect("no live snapshot");
    assert_eq!(live.length(), 250);
    for (min, max) in live.columns() {
        assert_eq!(min, -max);
    }

    let viewport = Viewport::new(1.0, config.render.live_scale, config.render.rows as f32);
    let bars = render_tail(&live, 5, &viewport);
    assert_eq!(bars.len(), 5);
    let values: Vec<i16> = bars
        .iter()
        .filter_map(|b| live.column(b.column as usize))
        .map(|(min, _)| min)
        .collect();
    assert_eq!(values, vec![0, 28, 37, -20, 0]);
}

#[tokio::test]
async fn recorded_file_renders_one_bar_per_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    write_wav(&path, 3.0, 44_100);

    let handle = spawn_extraction(&path, dir.path(), &ExtractorConfig::default()).unwrap();
    let waveform = handle.finish().await.unwrap();
    // 132300 / 256 = 516.8
    assert_eq!(waveform.length(), 517);

    let viewport = Viewport::new(2.0, 1.0, 100.0);
    let bars = render_all(&waveform, &viewport);
    assert_eq!(bars.len(), waveform.length() as usize);
    for (i, bar) in bars.iter().enumerate() {
        assert_eq!(bar.column as usize, i);
        assert_eq!(bar.x, i as f32 * 2.0);
        assert!(bar.min_height <= bar.max_height);
        assert!(bar.max_height.abs() <= 50.0 && bar.min_height.abs() <= 50.0);
    }
}

#[test]
fn column_aligned_windows_tile_without_gaps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    write_wav(&path, 1.0, 22_050);

    let waveform: Waveform = WaveformExtractor::new(&path, dir.path(), ExtractorConfig::default())
        .last()
        .unwrap()
        .unwrap()
        .waveform;

    let viewport = Viewport::new(1.0, 1.0, 40.0);
    let length = waveform.length() as u64;
    let mut columns = Vec::new();
    let mut first = 0;
    while first < length {
        let next = (first + 20).min(length);
        let start = waveform.time_at(first);
        let span = waveform.time_at(next) - start;
        columns.extend(render(&waveform, start, span, &viewport).iter().map(|b| b.column));
        first = next;
    }
    let expected: Vec<u32> = (0..waveform.length()).collect();
    assert_eq!(columns, expected);
}

#[test]
fn saved_waveform_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    write_wav(&path, 0.5, 8_000);

    let config = ExtractorConfig {
        bits: 8,
        ..ExtractorConfig::default()
    };
    let waveform = WaveformExtractor::new(&path, dir.path(), config)
        .last()
        .unwrap()
        .unwrap()
        .waveform;

    let file = dir.path().join("take.wfm");
    waveform.save(&file).unwrap();
    assert_eq!(Waveform::load(&file).unwrap(), waveform);
}
