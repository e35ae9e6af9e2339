// src/main.rs

use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};

use waveform_pipeline::config::PipelineConfig;
use waveform_pipeline::controller::RecorderApp;

const FRAME: Duration = Duration::from_millis(50);

fn init_logging(output: &std::path::Path) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    // Raw-mode output would be torn up by log lines on stderr.
    let log_path = output.with_extension("log");
    match File::create(&log_path) {
        Ok(file) => {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Err(e) => eprintln!("Logging to stderr ({}: {e})", log_path.display()),
    }
    builder.init();
}

fn main() -> Result<(), anyhow::Error> {
    let mut args = std::env::args().skip(1);
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("recording.wav"));
    init_logging(&output);

    let config = match args.next() {
        Some(path) => PipelineConfig::load_or_default(path),
        None => PipelineConfig::default(),
    };
    config.validate().context("invalid configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_time()
        .build()
        .context("building tokio runtime")?;
    let _guard = runtime.enter();

    let mut app = RecorderApp::new(config, &output);

    enable_raw_mode()?;
    let result = event_loop(&mut app);
    disable_raw_mode()?;
    println!();
    result
}

fn event_loop(app: &mut RecorderApp) -> Result<(), anyhow::Error> {
    app.run_tick()?;
    loop {
        if event::poll(FRAME)? {
            if let Event::Key(ev) = event::read()? {
                if ev.kind != KeyEventKind::Press {
                    continue;
                }
                let ctrl_c =
                    ev.code == KeyCode::Char('c') && ev.modifiers.contains(KeyModifiers::CONTROL);
                if ctrl_c || app.should_quit(ev.code) {
                    return Ok(());
                }
                app.handle_key(ev.code);
            }
        }
        app.run_tick()?;
    }
}
