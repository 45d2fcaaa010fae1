//! Interactive first-run setup wizard (`parley setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Confirm, Input, Select};

use crate::config::API_KEY_STORE_KEY;
use crate::config::file::ParleyConfigFile;
use crate::providers::KeyStore;
use crate::voice::TtsProvider;

/// Answers collected by the wizard
#[derive(Debug, Default)]
struct SetupAnswers {
    language: String,
    chat_model: String,
    system_prompt: Option<String>,
    tts_provider: TtsProvider,
    tts_url: Option<String>,
    tts_voice: String,
    wake_phrase: Option<String>,
    end_phrase: Option<String>,
}

/// Run the interactive setup wizard
///
/// The API key goes to the key store; everything else to the config file.
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup(store: &KeyStore) -> anyhow::Result<()> {
    println!("Parley Setup\n");

    // Load existing config if present
    let existing = crate::config::file::load_config_file();
    let config_path = crate::config::file::config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/parley/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. API key
    let existing_key = store.get(API_KEY_STORE_KEY)?;
    let masked = existing_key.as_deref().map(mask);
    let prompt = masked.as_ref().map_or_else(
        || "Groq API key".to_string(),
        |m| format!("Groq API key (current: {m}, leave blank to keep)"),
    );

    let api_key_input: String = Input::new()
        .with_prompt(&prompt)
        .allow_empty(true)
        .interact_text()?;

    if !api_key_input.trim().is_empty() {
        store.set(API_KEY_STORE_KEY, api_key_input.trim())?;
        println!("API key saved");
    }

    // 2. Conversation
    let language: String = Input::new()
        .with_prompt("Transcription language")
        .default(existing.stt.language.clone().unwrap_or_else(|| "fr".to_string()))
        .interact_text()?;

    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(
            existing
                .chat
                .model
                .clone()
                .unwrap_or_else(|| "gemma2-9b-it".to_string()),
        )
        .interact_text()?;

    let system_prompt: String = Input::new()
        .with_prompt("System prompt (optional)")
        .default(existing.chat.system_prompt.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;

    // 3. Speech synthesis
    let providers = ["openai", "synthesize"];
    let default_provider = usize::from(existing.tts.provider == Some(TtsProvider::Synthesize));
    let provider_idx = Select::new()
        .with_prompt("Speech synthesis service")
        .items(&providers)
        .default(default_provider)
        .interact()?;
    let tts_provider = if provider_idx == 1 {
        TtsProvider::Synthesize
    } else {
        TtsProvider::OpenAi
    };

    let tts_url = if tts_provider == TtsProvider::Synthesize {
        let url: String = Input::new()
            .with_prompt("Synthesize endpoint URL")
            .default(existing.tts.url.clone().unwrap_or_default())
            .interact_text()?;
        Some(url)
    } else {
        None
    };

    let tts_voice: String = Input::new()
        .with_prompt("Voice")
        .default(
            existing
                .tts
                .voice
                .clone()
                .unwrap_or_else(|| "fr-FR-DeniseNeural".to_string()),
        )
        .interact_text()?;

    // 4. Phrase gates
    let use_wake = Confirm::new()
        .with_prompt("Only answer when addressed by a wake phrase?")
        .default(existing.turn.wake_phrase.is_some())
        .interact()?;
    let wake_phrase = if use_wake {
        let phrase: String = Input::new()
            .with_prompt("Wake phrase")
            .default(
                existing
                    .turn
                    .wake_phrase
                    .clone()
                    .unwrap_or_else(|| "monsieur".to_string()),
            )
            .interact_text()?;
        Some(phrase)
    } else {
        None
    };

    let end_phrase: String = Input::new()
        .with_prompt("Phrase that ends the session")
        .default(
            existing
                .turn
                .end_phrase
                .clone()
                .unwrap_or_else(|| crate::turn::DEFAULT_END_PHRASE.to_string()),
        )
        .interact_text()?;

    let answers = SetupAnswers {
        language,
        chat_model,
        system_prompt: Some(system_prompt).filter(|p| !p.trim().is_empty()),
        tts_provider,
        tts_url,
        tts_voice,
        wake_phrase,
        end_phrase: Some(end_phrase).filter(|p| !p.trim().is_empty()),
    };

    write_config(&config_path, &serialize_config(&answers, &existing))?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `parley -v` to start talking.");

    Ok(())
}

/// Show only the ends of a secret
fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

/// Write the config file, creating its directory
fn write_config(path: &Path, toml: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml)?;
    Ok(())
}

/// Quote a string as a TOML basic string
fn quoted(value: &str) -> String {
    toml::Value::String(value.to_string()).to_string()
}

/// Serialize answers to a readable TOML string, keeping untouched sections
fn serialize_config(answers: &SetupAnswers, existing: &ParleyConfigFile) -> String {
    let mut out = String::new();

    // [api]
    if let Some(ref base_url) = existing.api.base_url {
        out.push_str("[api]\n");
        out.push_str(&format!("base_url = {}\n\n", quoted(base_url)));
    }

    // [stt]
    out.push_str("[stt]\n");
    if let Some(ref model) = existing.stt.model {
        out.push_str(&format!("model = {}\n", quoted(model)));
    }
    out.push_str(&format!("language = {}\n\n", quoted(&answers.language)));

    // [chat]
    out.push_str("[chat]\n");
    out.push_str(&format!("model = {}\n", quoted(&answers.chat_model)));
    if let Some(ref prompt) = answers.system_prompt {
        out.push_str(&format!("system_prompt = {}\n", quoted(prompt)));
    }
    out.push('\n');

    // [tts]
    out.push_str("[tts]\n");
    let provider = match answers.tts_provider {
        TtsProvider::OpenAi => "openai",
        TtsProvider::Synthesize => "synthesize",
    };
    out.push_str(&format!("provider = \"{provider}\"\n"));
    if let Some(ref url) = answers.tts_url {
        out.push_str(&format!("url = {}\n", quoted(url)));
    }
    out.push_str(&format!("voice = {}\n\n", quoted(&answers.tts_voice)));

    // [turn]
    out.push_str("[turn]\n");
    if let Some(ref wake) = answers.wake_phrase {
        out.push_str(&format!("wake_phrase = {}\n", quoted(wake)));
    }
    if let Some(ref end) = answers.end_phrase {
        out.push_str(&format!("end_phrase = {}\n", quoted(end)));
    }
    if let Some(resume) = existing.turn.resume_on_playback {
        out.push_str(&format!("resume_on_playback = {resume}\n"));
    }
    if let Some(pause) = existing.turn.pause_while_processing {
        out.push_str(&format!("pause_while_processing = {pause}\n"));
    }

    out
}
