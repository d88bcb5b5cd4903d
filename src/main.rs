// src/main.rs
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};

use rppg_vitals::config::PipelineConfig;
use rppg_vitals::drivers::{
    render_spectrum_png, render_waveform_png, PlotStyle, PosExtractor, SpectrumBuilder,
    SyntheticFaceSource, SyntheticPulse,
};
use rppg_vitals::model::SPO2_CAVEAT;
use rppg_vitals::recorder::SignalRecorder;
use rppg_vitals::store::{JsonFileStore, ResultStore};
use rppg_vitals::{SessionController, SessionEvent, SessionState};

const USAGE: &str = "usage: rppg-vitals [config.json] [--bpm N] [--out DIR] [--realtime]";

struct Args {
    config: Option<PathBuf>,
    bpm: f32,
    out: Option<PathBuf>,
    realtime: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        bpm: SyntheticPulse::default().bpm,
        out: None,
        realtime: false,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--bpm" => {
                let value = it.next().ok_or_else(|| anyhow!("--bpm needs a value\n{USAGE}"))?;
                args.bpm = value.parse().with_context(|| format!("invalid bpm {value:?}"))?;
            }
            "--out" => {
                let value = it.next().ok_or_else(|| anyhow!("--out needs a directory\n{USAGE}"))?;
                args.out = Some(PathBuf::from(value));
            }
            "--realtime" => args.realtime = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => bail!("unknown option {flag}\n{USAGE}"),
            path if args.config.is_none() => args.config = Some(PathBuf::from(path)),
            extra => bail!("unexpected argument {extra}\n{USAGE}"),
        }
    }
    Ok(args)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let pulse = SyntheticPulse {
        bpm: args.bpm,
        ..SyntheticPulse::default()
    };
    let source = SyntheticFaceSource::new(pulse, 1).realtime(args.realtime);
    let frame_dim = (config.capture.frame_height, config.capture.frame_width);
    let extractor = Arc::new(PosExtractor::new(&config.extractor, frame_dim));
    let store = args.out.as_ref().map(|dir| {
        Arc::new(JsonFileStore::new(dir.join("results.json")).with_outbox(dir.join("outbox")))
            as Arc<dyn ResultStore>
    });
    let mut controller =
        SessionController::new(config.clone(), Box::new(source), extractor, store);

    let events = controller.subscribe();
    thread::spawn(move || {
        let mut reported = 0u32;
        for event in events.iter() {
            match event {
                SessionEvent::State(SessionState::Recording { progress, elapsed_secs }) => {
                    let step = (progress * 4.0) as u32;
                    if step > reported {
                        reported = step;
                        info!("recording {:.0}% ({elapsed_secs:.1} s)", progress * 100.0);
                    }
                }
                SessionEvent::State(state) => info!("session {}", state.name()),
                SessionEvent::Warning(w) => warn!("{w}"),
            }
        }
    });

    controller.request_session()?;
    let handle = controller.confirm_alignment()?;
    let outcome = handle
        .wait_timeout(config.session_timeout() + Duration::from_secs(1))
        .ok_or_else(|| anyhow!("session ended without an outcome"))?;
    let result = outcome.context("measurement failed")?;
    println!("{}", result.to_json()?);
    if let Some(spo2) = &result.spo2 {
        if spo2.is_reference_only_at(config.spo2.min_confidence) {
            warn!("{SPO2_CAVEAT}");
        }
    }

    if let Some(dir) = &args.out {
        fs::create_dir_all(dir)?;
        let analysis = controller
            .last_analysis()
            .ok_or_else(|| anyhow!("completed session left no analysis"))?;
        let mut recorder = SignalRecorder::new();
        recorder.start(dir, result.session_id.as_str())?;
        recorder.write_analysis(&analysis)?;
        recorder.stop()?;

        let style = PlotStyle::default();
        let conditioned = &analysis.conditioned;
        fs::write(dir.join("waveform.png"), render_waveform_png(conditioned, &style)?)?;
        let spectrum = SpectrumBuilder::with_size(config.heart_rate.fft_size)
            .compute(conditioned.samples(), conditioned.sample_rate_hz());
        let band = (config.conditioner.low_hz, config.conditioner.high_hz);
        let png = render_spectrum_png(&spectrum, band, band.1 * 1.5, &style)?;
        fs::write(dir.join("spectrum.png"), png)?;
        info!("wrote signals and plots to {}", dir.display());
    }
    // waits for the result to be stored
    controller.dismiss()?;
    Ok(())
}
