//! EchoProber - acoustic ranging probe client
//!
//! Entry point for the command-line client.

use anyhow::{Context, Result};
use echoprober::audio::convert::FormatConverter;
use echoprober::event::EventLog;
use echoprober::session::io::Collaborators;
use echoprober::session::recording::PcmFileCapture;
use echoprober::{ProbeConfig, ProbeEvent, ProbeWaveform, SessionController};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Default)]
struct CliOptions {
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    offline: bool,
    config: Option<PathBuf>,
    storage: Option<PathBuf>,
    text: Option<String>,
    write_wav: Option<PathBuf>,
}

enum Command {
    Run(CliOptions),
    Exit,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("echoprober=info".parse()?)
                .add_directive("echoprober_core=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Exit) => return Ok(()),
        Err(message) => {
            eprintln!("Error: {}", message);
            println!();
            print_help();
            return Ok(());
        }
    };

    let mut config = match &options.config {
        Some(path) => ProbeConfig::load(path),
        None => ProbeConfig::default(),
    };
    if let Some(host) = &options.host {
        config.host = host.clone();
    }
    if let Some(port) = options.port {
        config.port = port;
    }
    if let Some(dir) = &options.storage {
        config.storage_dir = dir.clone();
    }

    if let Some(path) = &options.write_wav {
        return write_wav(&config, path);
    }

    run(config, options)
}

fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let mut options = CliOptions::default();
    let mut i = 1;

    let value = |i: usize, flag: &str| -> std::result::Result<String, String> {
        args.get(i + 1)
            .cloned()
            .ok_or_else(|| format!("{} requires a value", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "--version" | "-v" => {
                println!("echoprober {} ({})", echoprober::VERSION, echoprober::BUILD_DATE);
                return Ok(Command::Exit);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(Command::Exit);
            }
            "--offline" => {
                options.offline = true;
                i += 1;
                continue;
            }
            flag @ ("--host" | "--port" | "--name" | "--config" | "--storage" | "--text"
            | "--write-wav") => {
                let v = value(i, flag)?;
                match flag {
                    "--host" => options.host = Some(v),
                    "--port" => {
                        options.port = Some(v.parse().map_err(|_| format!("Invalid port: {}", v))?)
                    }
                    "--name" => options.name = Some(v),
                    "--config" => options.config = Some(PathBuf::from(v)),
                    "--storage" => options.storage = Some(PathBuf::from(v)),
                    "--text" => options.text = Some(v),
                    _ => options.write_wav = Some(PathBuf::from(v)),
                }
                i += 2;
                continue;
            }
            arg => return Err(format!("Unknown argument: {}", arg)),
        }
    }

    Ok(Command::Run(options))
}

fn print_help() {
    println!("Usage: echoprober [OPTIONS]");
    println!();
    println!("Options:");
    println!("      --host HOST       Probe server host (default: {})", echoprober::config::DEFAULT_HOST);
    println!("      --port PORT       Probe server port (default: {})", echoprober::config::DEFAULT_PORT);
    println!("      --name NAME       Offline session name (default: start time)");
    println!("      --offline         Do not connect; record to local storage");
    println!("      --config FILE     Load settings from a JSON file");
    println!("      --storage DIR     Directory for offline sessions");
    println!("      --text MSG        Send a text command after connecting");
    println!("      --write-wav FILE  Write the probe waveform as a WAV file and exit");
    println!("  -v, --version         Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Examples:");
    println!("  echoprober --host 192.168.1.20 --port 8173");
    println!("  echoprober --offline --name long_hallway");
    println!("  echoprober --write-wav probe.wav");
    println!();
    println!("Runs until Ctrl+C, or until the auto-stop timer ends an offline session.");
}

fn write_wav(config: &ProbeConfig, path: &std::path::Path) -> Result<()> {
    let waveform = ProbeWaveform::synthesize(&config.waveform).context("Invalid waveform")?;
    let wav = waveform
        .to_wav(config.waveform.left.volume, config.waveform.right.volume)
        .context("Failed to encode probe")?;
    wav.write_to(path)?;
    println!(
        "Wrote {} ({} bytes, {:.2}s)",
        path.display(),
        wav.len(),
        waveform.seconds()
    );
    Ok(())
}

#[cfg(feature = "device")]
fn collaborators(config: &ProbeConfig, events: echoprober::event::EventSender) -> Result<Collaborators> {
    use echoprober::audio::device::{CpalCapture, CpalPlayback};

    let converter = FormatConverter::new(config.wire)?;
    Ok(Collaborators {
        capture: Box::new(CpalCapture::new(config.capture_buffer_frames)),
        playback: Box::new(CpalPlayback::new(echoprober::PROBE_SAMPLE_RATE)),
        file_capture: Box::new(PcmFileCapture::new(
            Box::new(CpalCapture::new(config.capture_buffer_frames)),
            converter,
            events,
        )),
    })
}

#[cfg(not(feature = "device"))]
fn collaborators(config: &ProbeConfig, events: echoprober::event::EventSender) -> Result<Collaborators> {
    use echoprober::session::io::{CaptureFormat, ChannelCapture, SilentPlayback};

    warn!("Built without the `device` feature: no live audio, running headless");
    let format = CaptureFormat {
        sample_rate: config.wire.sample_rate,
        channels: config.wire.channels,
    };
    let (capture, _feed) = ChannelCapture::new(format);
    let (file_source, _file_feed) = ChannelCapture::new(format);
    let converter = FormatConverter::new(config.wire)?;
    Ok(Collaborators {
        capture: Box::new(capture),
        playback: Box::new(SilentPlayback::new()),
        file_capture: Box::new(PcmFileCapture::new(Box::new(file_source), converter, events)),
    })
}

fn run(config: ProbeConfig, options: CliOptions) -> Result<()> {
    println!("EchoProber v{}", echoprober::VERSION);
    println!();

    let (events_tx, events_rx) = crossbeam_channel::unbounded::<ProbeEvent>();
    let collaborators = collaborators(&config, events_tx.clone())?;
    let mut controller = SessionController::with_events(config, collaborators, events_tx, events_rx)
        .context("Failed to set up session")?;
    let events = controller.events();
    let mut log = EventLog::default();

    if !options.offline {
        if let Err(e) = controller.connect() {
            warn!(error = %e, "Continuing offline");
        }
    }
    if let Some(text) = &options.text {
        if let Err(e) = controller.send_text(text) {
            error!(error = %e, "Text not sent");
        }
    }

    controller.set_session_name(options.name.clone());
    if let Err(e) = controller.start() {
        print_events(&events, &mut log);
        error!(error = %e, "Failed to start session");
        println!("Error: {}", e);
        controller.disconnect();
        return Ok(());
    }

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .ok();

    println!("Session running. Press Ctrl+C to stop.");
    println!("────────────────────────────────────────");

    while running.load(Ordering::SeqCst) && controller.state().is_playing() {
        controller.wait_pending(Duration::from_millis(100));
        print_events(&events, &mut log);
    }

    let snapshot = controller.snapshot();
    println!();
    println!("Stopping...");
    controller.stop();
    controller.disconnect();
    print_events(&events, &mut log);

    info!(
        converted = snapshot.frames_converted,
        dropped = snapshot.frames_dropped,
        "Session finished"
    );
    println!("Done.");
    Ok(())
}

fn print_events(events: &crossbeam_channel::Receiver<ProbeEvent>, log: &mut EventLog) {
    for event in events.try_iter() {
        println!("{}", log.push(&event));
    }
}
