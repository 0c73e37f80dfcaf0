use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use newscast::voice::{
    AudioDevices, AudioInput, CpalDevices, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, OutputSink,
    PlaybackScheduler,
};
use newscast::{Config, GenAiClient, LiveSession, SessionState};

/// Naija NewsCast - AI news podcasts and live voice conversation
#[derive(Parser)]
#[command(name = "newscast", version, about)]
struct Cli {
    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk with the news assistant until Ctrl-C
    Live,
    /// Ask a quick question
    Chat {
        /// Question to ask
        prompt: String,
    },
    /// Ask for an in-depth analysis
    Analyze {
        /// Question to analyze
        prompt: String,
    },
    /// Generate today's news podcast as a WAV file
    Podcast {
        /// Output file (default: newscast-<date>.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,newscast=info",
        1 => "info,newscast=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(key) = cli.api_key.filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(SecretString::from(key));
    }
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Live => cmd_live(&config).await,
        Command::Chat { prompt } => {
            let client = GenAiClient::from_config(&config)?;
            println!("{}", client.quick_reply(&prompt).await?);
            Ok(())
        }
        Command::Analyze { prompt } => {
            let client = GenAiClient::from_config(&config)?;
            println!("Analyzing...\n");
            println!("{}", client.deep_analysis(&prompt).await?);
            Ok(())
        }
        Command::Podcast { output } => cmd_podcast(&config, output).await,
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

/// Run a live conversation, printing finalized turns
async fn cmd_live(config: &Config) -> anyhow::Result<()> {
    let session = LiveSession::from_config(config)?;
    let mut status = session.subscribe();

    println!("Connecting... (press Ctrl-C to end)\n");
    if let Err(e) = session.start().await {
        let message = session.status().error.unwrap_or_default();
        anyhow::bail!("{message} ({e})");
    }

    let mut printed = 0;
    let mut last_state = SessionState::Connecting;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                tracing::info!("interrupted, ending conversation");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();

                for entry in current.transcript.iter().skip(printed) {
                    if !entry.user.is_empty() {
                        println!("You: {}", entry.user);
                    }
                    if !entry.model.is_empty() {
                        println!("AI:  {}", entry.model);
                    }
                    println!();
                }
                printed = current.transcript.len();

                if current.state != last_state {
                    tracing::info!(state = %current.state, "session state changed");
                    last_state = current.state;
                }
                if current.state == SessionState::Disconnected {
                    if let Some(error) = current.error {
                        anyhow::bail!(error);
                    }
                    println!("Session ended.");
                    break;
                }
            }
        }
    }

    session.stop();
    Ok(())
}

/// Generate and save today's podcast
async fn cmd_podcast(config: &Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let client = GenAiClient::from_config(config)?;
    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "newscast-{}.wav",
            chrono::Local::now().format("%Y-%m-%d")
        ))
    });

    println!("Generating today's news podcast...");
    let briefing = newscast::podcast::generate_podcast(&client, &path).await?;

    println!("\nSaved to {}", path.display());
    if !briefing.sources.is_empty() {
        println!("\nSources:");
        for source in &briefing.sources {
            println!("  - {} <{}>", source.title, source.uri);
        }
    }

    Ok(())
}

/// Test microphone input through the capture pipeline
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut input = CpalDevices.open_input(config.live.frame_size)?;
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    input.start(frames_tx)?;

    println!(
        "Sample rate: {INPUT_SAMPLE_RATE} Hz, {} samples per frame",
        config.live.frame_size
    );
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    let mut count = 0u64;
    loop {
        let frame = tokio::select! {
            () = tokio::time::sleep_until(deadline) => break,
            frame = frames_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        count += 1;

        let samples = frame.samples();
        let energy = calculate_rms(samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{count:3}] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
    }

    input.stop();

    println!("\n---");
    println!("Captured {count} frames.");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a tone streamed as separate fragments
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear an unbroken 440Hz tone for 2 seconds\n");

    let sink = CpalDevices.open_output(OUTPUT_SAMPLE_RATE)?;
    let mut scheduler = PlaybackScheduler::new(sink.clone(), 0);

    let frequency = 440.0_f32;
    let fragment_len = OUTPUT_SAMPLE_RATE as usize / 5;
    let fragments = 10;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..fragment_len * fragments)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for chunk in tone.chunks(fragment_len) {
        let placed = scheduler.schedule_samples(chunk.to_vec())?;
        tracing::debug!(start = placed.start, frames = placed.frames, "fragment scheduled");
    }
    println!(
        "Scheduled {fragments} fragments, {:.1}s of audio...",
        scheduler.cursor_secs()
    );

    // Give up if the device clock stalls
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.now() < scheduler.cursor() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    sink.close();

    println!("\n---");
    println!("If you heard a smooth tone, gapless playback is working!");
    println!("Clicks between fragments mean the output clock is drifting.");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
