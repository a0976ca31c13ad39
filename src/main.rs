//! voiceable: chat-style screen reader.
//!
//! Summarizes pasted text or uploaded files with the DeepSeek chat API and
//! reads the result aloud through the host speech synthesizer.

mod api;
mod config;
mod conversation;
mod credentials;
mod ingest;
mod notifier;
mod repl;
mod session;
mod speech;
mod summarizer;

#[cfg(test)]
mod test_helpers;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::credentials::FileSecretStore;
use crate::ingest::{ingest, UploadedFile};
use crate::speech::SpeechController;
use crate::summarizer::Summarizer;

#[derive(Parser, Debug)]
#[command(name = "voiceable", about = "Summarize text and read it aloud")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Interactive terminal chat (default)
    Chat,
    /// Serve the local HTTP API
    Serve {
        /// Port override (default from config, 8768)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Summarize text or a file and print the result
    Summarize {
        /// Text to summarize
        text: Option<String>,
        /// Read the text from a .txt file instead
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Also read the summary aloud
        #[arg(short, long)]
        speak: bool,
    },
    /// Read text aloud
    Speak { text: String },
    /// List the voices of the speech engine
    Voices,
    /// Manage the stored DeepSeek API key
    Key {
        #[command(subcommand)]
        action: KeyCmd,
    },
}

#[derive(Subcommand, Debug)]
enum KeyCmd {
    /// Save a key
    Set { key: String },
    /// Remove the saved key
    Clear,
    /// Show whether a key is saved
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy hyper/reqwest internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref());

    let store = Arc::new(FileSecretStore::new(config.credentials.resolved_path()));
    info!("Credentials at {}", store.path().display());
    let summarizer = Summarizer::new(&config.api, store)?;

    match args.command.unwrap_or(Cmd::Chat) {
        Cmd::Chat => {
            let session = build_session(&config, summarizer);
            repl::run(session).await?;
        }
        Cmd::Serve { port } => {
            let session = build_session(&config, summarizer);
            let port = port.unwrap_or(config.server.port);
            api::serve(api::ApiState { session }, port).await?;
        }
        Cmd::Summarize { text, file, speak } => {
            let text = match (text, file) {
                (_, Some(path)) => ingest(&UploadedFile::from_path(&path).await?)?.content,
                (Some(text), None) => text,
                (None, None) => return Err("nothing to summarize: pass text or --file".into()),
            };
            let summary = summarizer.summarize(&text).await?;
            println!("{summary}");
            if speak {
                speech_controller(&config).speak(&summary).await?;
            }
        }
        Cmd::Speak { text } => {
            speech_controller(&config).speak(&text).await?;
        }
        Cmd::Voices => {
            let engine = speech::detect_engine(&config.speech);
            println!("Engine: {}", engine.name());
            for voice in engine.voices() {
                let local = if voice.local_service { "local" } else { "remote" };
                println!("{:<32} {:<10} {local}", voice.name, voice.lang);
            }
        }
        Cmd::Key { action } => match action {
            KeyCmd::Set { key } => {
                summarizer.save_api_key(&key)?;
                println!("API key saved.");
            }
            KeyCmd::Clear => {
                summarizer.remove_api_key()?;
                println!("API key removed.");
            }
            KeyCmd::Status => {
                if summarizer.has_api_key() {
                    println!("API key is configured.");
                } else {
                    println!("No API key saved.");
                }
            }
        },
    }

    Ok(())
}

fn speech_controller(config: &Config) -> Arc<SpeechController> {
    let engine = speech::detect_engine(&config.speech);
    info!("Speech engine: {}", engine.name());
    Arc::new(SpeechController::new(engine, &config.speech))
}

fn build_session(config: &Config, summarizer: Summarizer) -> Arc<session::ChatSession> {
    let notifier = Arc::new(notifier::Notifier::new(config.feedback.notifications));
    session::ChatSession::new(
        summarizer,
        speech_controller(config),
        notifier,
        config.session.clone(),
    )
}
