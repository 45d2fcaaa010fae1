use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use parley::agent::HttpChatCompletion;
use parley::config::API_KEY_STORE_KEY;
use parley::console::{self, ConsoleCommand, ConsoleRenderer};
use parley::turn::{AssistantHandle, Collaborators, Session, TurnController};
use parley::voice::{
    AudioCapture, HttpSpeechToText, HttpTextToSpeech, MicDetector, SpeakerOutput,
    calculate_energy,
};
use parley::{Config, KeyStore, db};

/// Parley - interruption-aware voice assistant
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Do not start the microphone; talk by typing
    #[arg(long, env = "PARLEY_NO_VOICE")]
    no_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the stored API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Interactive first-run setup
    Setup,
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store the API key (prompts when omitted)
    Set {
        /// Key value
        value: Option<String>,
    },
    /// Show whether a key is stored
    Get,
    /// Delete the stored key
    Remove,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "warn,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
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
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Key { action } => cmd_key(action),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::Setup => {
                let config = Config::load()?;
                parley::setup::run_setup(&open_store(&config)?)
            }
        };
    }

    let config = Config::load()?;
    tracing::debug!(
        stt_model = %config.stt.model,
        chat_model = %config.chat.model,
        tts_provider = ?config.tts.provider,
        "loaded configuration"
    );

    let store = open_store(&config)?;
    let credential = match config.api_key.clone() {
        Some(key) => Some(key),
        None => store.get(API_KEY_STORE_KEY)?,
    };
    if credential.is_none() {
        tracing::warn!("no API key configured; run `parley key set` or set GROQ_API_KEY");
    }

    let collaborators = Collaborators {
        detector: Box::new(MicDetector::new(config.vad_config())),
        stt: Arc::new(HttpSpeechToText::new(config.stt.clone())),
        chat: Arc::new(HttpChatCompletion::new(config.chat.clone())),
        tts: Arc::new(HttpTextToSpeech::new(config.tts.clone())),
        output: Arc::new(SpeakerOutput::new()),
        sink: Arc::new(ConsoleRenderer::new()),
    };

    let session = Session::new(credential.map(SecretString::from));
    let (handle, controller) = TurnController::spawn(session, config.policy(), collaborators);

    if cli.no_voice {
        println!("parley ready (typing only). /help for commands.");
    } else {
        handle.start()?;
        match config.turn.wake_phrase.as_deref() {
            Some(wake) => println!("parley ready - say \"{wake}\". /help for commands."),
            None => println!("parley ready - start talking. /help for commands."),
        }
    }

    let result = console_loop(&handle).await;

    let _ = handle.shutdown();
    if let Err(e) = controller.await {
        tracing::warn!(error = %e, "turn controller task failed");
    }

    result
}

/// Read typed input until `/quit`, end of input, or Ctrl-C
async fn console_loop(handle: &AssistantHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                return Ok(());
            }
        };

        let Some(line) = line else {
            return Ok(());
        };

        match console::parse_line(&line) {
            None => {}
            Some(ConsoleCommand::Say(text)) => handle.send_text(text)?,
            Some(ConsoleCommand::Start) => handle.start()?,
            Some(ConsoleCommand::Stop) => handle.stop()?,
            Some(ConsoleCommand::Mute) => handle.set_muted(true)?,
            Some(ConsoleCommand::Unmute) => handle.set_muted(false)?,
            Some(ConsoleCommand::Reset) => handle.reset()?,
            Some(ConsoleCommand::Help) => println!("{}", console::HELP),
            Some(ConsoleCommand::Quit) => return Ok(()),
        }
    }
}

/// Open the key store under the configured data directory
fn open_store(config: &Config) -> anyhow::Result<KeyStore> {
    let pool = db::init(&config.database_path())?;
    Ok(KeyStore::new(pool))
}

/// Manage the stored API key
fn cmd_key(action: KeyAction) -> anyhow::Result<()> {
    let config = Config::load()?;
    let store = open_store(&config)?;

    match action {
        KeyAction::Set { value } => {
            let value = match value {
                Some(value) => value,
                None => dialoguer::Password::new()
                    .with_prompt("API key")
                    .interact()?,
            };
            let value = value.trim();
            if value.is_empty() {
                anyhow::bail!("API key cannot be empty");
            }
            store.set(API_KEY_STORE_KEY, value)?;
            println!("API key saved to {}", config.database_path().display());
        }
        KeyAction::Get => match store.get(API_KEY_STORE_KEY)? {
            Some(_) => println!("API key is stored"),
            None if config.api_key.is_some() => {
                println!("API key comes from the environment or config file");
            }
            None => println!("no API key stored"),
        },
        KeyAction::Remove => {
            if store.remove(API_KEY_STORE_KEY)? {
                println!("API key removed");
            } else {
                println!("no API key stored");
            }
        }
    }

    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::open()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        // Clear buffer each second
        capture.clear_buffer();
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}
