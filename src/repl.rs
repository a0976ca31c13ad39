//! Terminal chat front end.
//!
//! Plain lines are submitted for summarization; lines starting with `/` are
//! commands. Messages are printed with 1-based numbers for `/play`.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::conversation::{Message, Role};
use crate::ingest::ACCEPTED_EXTENSIONS;
use crate::session::{ChatSession, UploadOutcome};

const HELP: &str = "\
Type or paste text and press Enter to summarize it.

Commands:
  /upload <path>...   summarize a .txt file (first path only)
  /play <n>           read message n aloud
  /stop               stop reading
  /key set <key>      save the DeepSeek API key
  /key clear          remove the saved key
  /key status         show whether a key is saved
  /list               show the conversation
  /help               show this help
  /quit               exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Set(String),
    Clear,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Upload(Vec<PathBuf>),
    Play(usize),
    Stop,
    Key(KeyAction),
    List,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Submit(line.to_string());
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    match (name, args.as_slice()) {
        ("upload", []) => Command::Invalid("usage: /upload <path>".into()),
        ("upload", paths) => Command::Upload(paths.iter().map(PathBuf::from).collect()),
        ("play", [n]) => match n.parse::<usize>() {
            Ok(n) if n >= 1 => Command::Play(n),
            _ => Command::Invalid(format!("not a message number: {n}")),
        },
        ("play", _) => Command::Invalid("usage: /play <n>".into()),
        ("stop", []) => Command::Stop,
        ("key", ["set", key]) => Command::Key(KeyAction::Set(key.to_string())),
        ("key", ["clear"]) => Command::Key(KeyAction::Clear),
        ("key", ["status"]) | ("key", []) => Command::Key(KeyAction::Status),
        ("key", _) => Command::Invalid("usage: /key set <key> | clear | status".into()),
        ("list", []) => Command::List,
        ("help", _) => Command::Help,
        ("quit", []) | ("exit", []) => Command::Quit,
        _ => Command::Invalid(format!("unknown command: /{name} (try /help)")),
    }
}

fn format_message(index: usize, message: &Message) -> String {
    let speaker = match message.role {
        Role::User => "you",
        Role::Assistant => "voiceable",
    };
    let playing = if message.is_playing { " [playing]" } else { "" };
    format!(
        "[{index}] {speaker} {}{playing}\n{}\n",
        message.created_at.format("%H:%M"),
        message.content
    )
}

fn print_from(session: &ChatSession, start: usize) {
    for (i, message) in session.messages().iter().enumerate().skip(start) {
        println!("{}", format_message(i + 1, message));
    }
}

/// Run the chat loop until `/quit` or end of input.
pub async fn run(session: Arc<ChatSession>) -> std::io::Result<()> {
    print_from(&session, 0);
    println!("(/help for commands)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let seen = session.messages().len();
        match parse_command(&line) {
            Command::Empty => continue,
            Command::Submit(text) => match session.submit_text(&text).await {
                Ok(_) => print_from(&session, seen),
                Err(e) => println!("{e}"),
            },
            Command::Upload(paths) => {
                // Only the first file is used, so the rest are never read.
                let outcome = match paths.first() {
                    Some(path) => session.submit_path(path).await,
                    None => session.submit_files(&[]).await,
                };
                match outcome {
                    Ok(UploadOutcome::Submitted(_)) => print_from(&session, seen),
                    Ok(UploadOutcome::ComingSoon) => {
                        println!("PDF support is coming soon. Please paste the text directly.")
                    }
                    Ok(UploadOutcome::Rejected(reason)) => println!(
                        "Upload rejected: {reason} (accepted: {})",
                        ACCEPTED_EXTENSIONS.join(", ")
                    ),
                    Ok(UploadOutcome::NoFile) => println!("No file given."),
                    Err(e) => println!("{e}"),
                }
            }
            Command::Play(n) => {
                let Some(message) = session.messages().get(n - 1).cloned() else {
                    println!("No message {n} (there are {seen})");
                    continue;
                };
                let session = session.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.play(&message.id).await {
                        debug!("Playback ended: {e}");
                    }
                });
            }
            Command::Stop => session.stop_audio(),
            Command::Key(KeyAction::Set(key)) => match session.save_api_key(&key) {
                Ok(()) => println!("API key saved."),
                Err(e) => println!("{e}"),
            },
            Command::Key(KeyAction::Clear) => match session.remove_api_key() {
                Ok(()) => println!("API key removed."),
                Err(e) => println!("{e}"),
            },
            Command::Key(KeyAction::Status) => {
                if session.has_api_key() {
                    println!("API key is configured.");
                } else {
                    println!("No API key saved; summaries are previews only.");
                }
            }
            Command::List => print_from(&session, 0),
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
            Command::Invalid(reason) => println!("{reason}"),
        }
    }

    session.stop_audio();
    Ok(())
}
