//! Host speech engines.
//!
//! `CommandEngine` drives a command-line synthesizer (`espeak-ng`/`espeak`
//! on Linux, `say` on macOS) as a child process, one process per utterance.
//! Text goes in on stdin. `NullEngine` stands in when nothing is installed.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::voice::Voice;
use crate::config::SpeechConfig;

/// Words per minute at rate 1.0, for both espeak and say.
const BASE_WPM: f32 = 175.0;

/// Settles once with the engine's verdict on one utterance.
pub type Completion = oneshot::Receiver<Result<(), String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    /// Engine-specific voice id; `None` uses the engine default.
    pub voice: Option<String>,
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool;

    fn voices(&self) -> Vec<Voice>;

    /// Begin speaking. The returned completion settles when the engine
    /// finishes or reports an error.
    fn start(&self, utterance: Utterance) -> Result<Completion, String>;

    /// Silence whatever is being spoken. No-op when idle.
    fn cancel(&self);

    fn is_speaking(&self) -> bool;
}

pub struct NullEngine;

impl SpeechEngine for NullEngine {
    fn name(&self) -> &str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    fn start(&self, _utterance: Utterance) -> Result<Completion, String> {
        Err("no speech engine available".into())
    }

    fn cancel(&self) {}

    fn is_speaking(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Espeak,
    Say,
}

impl Flavor {
    fn list_voices_args(self) -> &'static [&'static str] {
        match self {
            Self::Espeak => &["--voices"],
            Self::Say => &["-v", "?"],
        }
    }

    fn parse_voices(self, output: &str) -> Vec<Voice> {
        match self {
            Self::Espeak => parse_espeak_voices(output),
            Self::Say => parse_say_voices(output),
        }
    }
}

struct Playback {
    id: u64,
    kill: oneshot::Sender<()>,
}

pub struct CommandEngine {
    program: PathBuf,
    flavor: Flavor,
    voices: Vec<Voice>,
    current: Arc<Mutex<Option<Playback>>>,
    next_id: AtomicU64,
}

impl CommandEngine {
    pub fn new(program: PathBuf, flavor: Flavor, voices: Vec<Voice>) -> Self {
        Self {
            program,
            flavor,
            voices,
            current: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Find a synthesizer on PATH.
    ///
    /// `backend` is `auto` (espeak-ng, espeak, then say) or one program name.
    /// Voice listing runs synchronously once, here.
    pub fn detect(backend: &str) -> Option<Self> {
        let candidates: Vec<(&str, Flavor)> = match backend {
            "auto" => vec![
                ("espeak-ng", Flavor::Espeak),
                ("espeak", Flavor::Espeak),
                ("say", Flavor::Say),
            ],
            "espeak-ng" | "espeak" => vec![(backend, Flavor::Espeak)],
            "say" => vec![("say", Flavor::Say)],
            other => {
                warn!("Unknown speech backend '{other}'");
                vec![]
            }
        };

        let (program, flavor) = candidates
            .into_iter()
            .find_map(|(name, flavor)| find_in_path(name).map(|p| (p, flavor)))?;

        let voices = match std::process::Command::new(&program)
            .args(flavor.list_voices_args())
            .output()
        {
            Ok(out) => flavor.parse_voices(&String::from_utf8_lossy(&out.stdout)),
            Err(e) => {
                warn!("Failed to list voices from {}: {e}", program.display());
                Vec::new()
            }
        };

        info!(
            "Speech engine: {} ({} voices)",
            program.display(),
            voices.len()
        );
        Some(Self::new(program, flavor, voices))
    }

    fn args(&self, utterance: &Utterance) -> Vec<String> {
        let wpm = (BASE_WPM * utterance.rate).round() as u32;
        let mut args = Vec::new();
        match self.flavor {
            Flavor::Espeak => {
                // espeak pitch is 0-99 (default 50), amplitude 0-200 (default 100)
                let pitch = (50.0 * utterance.pitch).round().clamp(0.0, 99.0) as u32;
                let amplitude = (100.0 * utterance.volume).round().clamp(0.0, 200.0) as u32;
                args.extend(["-s".to_string(), wpm.to_string()]);
                args.extend(["-p".to_string(), pitch.to_string()]);
                args.extend(["-a".to_string(), amplitude.to_string()]);
                if let Some(voice) = &utterance.voice {
                    args.extend(["-v".to_string(), voice.clone()]);
                }
                args.push("--stdin".to_string());
            }
            Flavor::Say => {
                args.extend(["-r".to_string(), wpm.to_string()]);
                if let Some(voice) = &utterance.voice {
                    args.extend(["-v".to_string(), voice.clone()]);
                }
                args.extend(["-f".to_string(), "-".to_string()]);
            }
        }
        args
    }
}

impl SpeechEngine for CommandEngine {
    fn name(&self) -> &str {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("speech")
    }

    fn is_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    fn start(&self, utterance: Utterance) -> Result<Completion, String> {
        let args = self.args(&utterance);
        debug!("Spawning {} {:?}", self.program.display(), args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to start {}: {e}", self.program.display()))?;
        let stdin = child.stdin.take();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (kill_tx, kill_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        if let Some(prev) = self
            .current
            .lock()
            .unwrap()
            .replace(Playback { id, kill: kill_tx })
        {
            let _ = prev.kill.send(());
        }

        let current = self.current.clone();
        let program = self.name().to_string();
        tokio::spawn(async move {
            let result = run_child(child, stdin, utterance.text, kill_rx, &program).await;
            {
                let mut guard = current.lock().unwrap();
                if guard.as_ref().is_some_and(|p| p.id == id) {
                    *guard = None;
                }
            }
            let _ = done_tx.send(result);
        });

        Ok(done_rx)
    }

    fn cancel(&self) {
        if let Some(playback) = self.current.lock().unwrap().take() {
            let _ = playback.kill.send(());
            debug!("Speech process {} interrupted", playback.id);
        }
    }

    fn is_speaking(&self) -> bool {
        self.current.lock().unwrap().is_some()
    }
}

async fn run_child(
    mut child: Child,
    stdin: Option<ChildStdin>,
    text: String,
    kill_rx: oneshot::Receiver<()>,
    program: &str,
) -> Result<(), String> {
    if let Some(mut stdin) = stdin {
        // A program that ignores stdin may close it early; the exit status
        // still decides the outcome.
        if let Err(e) = stdin.write_all(text.as_bytes()).await {
            debug!("Writing text to {program} failed: {e}");
        }
    }

    tokio::select! {
        status = child.wait() => match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => Err(format!("{program} exited with {s}")),
            Err(e) => Err(format!("{program} failed: {e}")),
        },
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop {program}: {e}");
            }
            Err("interrupted".into())
        }
    }
}

/// Pick the engine for `config`, falling back to `NullEngine`.
pub fn detect_engine(config: &SpeechConfig) -> Arc<dyn SpeechEngine> {
    if config.backend == "none" {
        info!("Speech disabled by config");
        return Arc::new(NullEngine);
    }
    match CommandEngine::detect(&config.backend) {
        Some(engine) => Arc::new(engine),
        None => {
            warn!("No speech synthesizer found (tried backend '{}')", config.backend);
            Arc::new(NullEngine)
        }
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|p| p.is_file())
}

/// Parse `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  en-us           --/M      English_(America)  gmw/en-US            (en 3)
/// ```
fn parse_espeak_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 4 {
                return None;
            }
            let lang = cols[1];
            Some(Voice::new(cols[3].replace('_', " "), lang, true).with_id(lang))
        })
        .collect()
}

/// Parse `say -v ?`:
///
/// ```text
/// Ava (Enhanced)      en_US    # Hello! My name is Ava.
/// ```
fn parse_say_voices(output: &str) -> Vec<Voice> {
    output
        .lines()
        .filter_map(|line| {
            let left = line.split('#').next()?.trim_end();
            let (name, lang) = left.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() || lang.is_empty() {
                return None;
            }
            Some(Voice::new(name, lang.replace('_', "-"), true))
        })
        .collect()
}
