mod cli;

use std::io::Write;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{after, never, tick};

use cli::Cli;
use fiddle_core::audio::CpalDevice;
use fiddle_core::config::{self, TunerSettings};
use fiddle_core::display::NoteDisplay;
use fiddle_core::estimator::SpectralEstimator;
use fiddle_core::tuning;
use fiddle_core::{CaptureSession, PitchSample};

/// Render cadence of the status line and the scale animation.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;

    let device = CpalDevice::default_input().context("No usable input device")?;
    let (session, samples) =
        CaptureSession::spawn(device, SpectralEstimator::new(), settings.clone())
            .context("Failed to start capture")?;

    let mut display = NoteDisplay::from_settings(&settings, cli.history);
    let frames = tick(FRAME_INTERVAL);
    let deadline = match cli.duration {
        Some(secs) if secs > 0.0 => after(Duration::from_secs_f64(secs)),
        _ => never(),
    };
    let started = Instant::now();
    let mut received: u64 = 0;

    loop {
        crossbeam_channel::select! {
            recv(samples) -> msg => match msg {
                Ok(sample) => {
                    received += 1;
                    display.ingest(&sample);
                    if cli.verbose_trace {
                        print_trace(&sample, &display);
                    }
                }
                Err(_) => {
                    log::info!("Capture session ended");
                    break;
                }
            },
            recv(frames) -> _ => {
                display.tick();
                if !cli.verbose_trace {
                    print_status(&display)?;
                }
            },
            recv(deadline) -> _ => {
                log::info!("Duration elapsed, stopping capture");
                session.stop();
                break;
            },
        }
    }
    println!();

    let summary = session.join().context("Capture session failed")?;
    log::info!(
        "{} windows in {:.1}s ({} received), {} buffer compactions",
        summary.windows_analyzed,
        started.elapsed().as_secs_f64(),
        received,
        summary.compactions
    );
    Ok(())
}

/// Settings file first, then command line overrides.
fn resolve_settings(cli: &Cli) -> Result<TunerSettings> {
    let mut settings = match &cli.settings {
        Some(path) => {
            let settings = config::load_settings(path)?;
            log::info!("Loaded settings from {}", path.display());
            settings
        }
        None => TunerSettings::default(),
    };

    if let Some(rate) = cli.analysis_rate {
        anyhow::ensure!(rate > 0, "--analysis-rate must be positive");
        settings.analysis_rate_hz = rate;
    }
    if let Some(reference) = cli.reference {
        settings.base_frequency = reference;
    }
    if let Some(naming) = cli.naming {
        settings.note_naming = naming.into();
    }
    if let Some(volume) = cli.min_volume {
        settings.min_volume_sensitivity = volume;
    }
    if settings.reference_frequency() != settings.base_frequency {
        log::warn!(
            "Reference {} Hz is out of range, using {} Hz",
            settings.base_frequency,
            settings.reference_frequency()
        );
    }
    Ok(settings)
}

fn print_status<G>(display: &NoteDisplay<G>) -> Result<()>
where
    G: fiddle_core::display::SampleGate,
{
    let note = display.tracker().state().current_note;
    let position = display.scale().state().current_position;
    let line = match display.current_label() {
        Some(label) => {
            let cents = tuning::cents_from_nearest(note);
            let alpha = display.current_alpha().unwrap_or(0.0);
            let marker = if alpha <= 0.0 {
                "in tune"
            } else if alpha >= 1.0 {
                "out"
            } else {
                "close"
            };
            format!("{:>4} {:+6.1} cents  [{:<7}]  scale {:6.2}", label, cents, marker, position)
        }
        None => format!("  --               [       ]  scale {:6.2}", position),
    };

    let mut stdout = std::io::stdout().lock();
    write!(stdout, "\r{}", line)?;
    stdout.flush()?;
    Ok(())
}

fn print_trace<G>(sample: &PitchSample, display: &NoteDisplay<G>)
where
    G: fiddle_core::display::SampleGate,
{
    let state = display.tracker().state();
    println!(
        "#{:<6} {:8.2} Hz  energy {:8.1}  note {:7.2}  base {:6.2}  {}",
        sample.sequence,
        sample.frequency_hz,
        sample.energy,
        state.current_note,
        state.base_note,
        display.current_label().unwrap_or_else(|| "--".into())
    );
}
