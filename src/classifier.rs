//! Language identification behind a narrow model interface.
//!
//! The model only has to turn one line of text into a raw label and a score.
//! Turning the raw label into a `lang_Script` tag happens in [`parse_label`],
//! so a change in the model's output format stays local to this module.

use async_trait::async_trait;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_secs(30);
const WARM_UP_TEXT: &str = "test";

/// Unparsed model answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPrediction {
    /// Label exactly as the model printed it, e.g. `__label__urd_Latn`.
    pub raw_label: String,
    /// Score attached to the label.
    pub confidence: f64,
}

/// Failures talking to the model.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The model process could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Executable that failed.
        program: String,
        /// Underlying failure.
        source: io::Error,
    },
    /// Reading from or writing to the model failed.
    #[error("classifier i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The model closed its output.
    #[error("classifier process exited")]
    Closed,
    /// No answer arrived in time.
    #[error("classifier did not answer within {0:?}")]
    Timeout(Duration),
    /// The answer was not `<label> <score>`.
    #[error("unparseable classifier output {0:?}")]
    Malformed(String),
}

/// A loaded language-identification model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Predicts the single most likely label for one line of text.
    async fn predict(&self, text: &str) -> Result<RawPrediction, ClassifierError>;
}

/// Extracts the `lang_Script` part of a raw label, or `None` when the label
/// does not have that shape.
pub fn parse_label(raw_label: &str) -> Option<String> {
    static LABEL: OnceLock<Regex> = OnceLock::new();
    let pattern = LABEL.get_or_init(|| {
        Regex::new(r"__label__([a-zA-Z]+_[a-zA-Z]+)").expect("label pattern")
    });
    pattern
        .captures(raw_label)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parses one `predict-prob` output line.
pub fn parse_prediction_line(line: &str) -> Result<RawPrediction, ClassifierError> {
    let malformed = || ClassifierError::Malformed(line.trim_end().to_string());
    let mut parts = line.split_whitespace();
    let raw_label = parts.next().ok_or_else(malformed)?;
    let confidence: f64 = parts
        .next()
        .and_then(|score| score.parse().ok())
        .filter(|score: &f64| score.is_finite())
        .ok_or_else(malformed)?;
    Ok(RawPrediction {
        raw_label: raw_label.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
    })
}

struct ModelChild {
    // Held so the process is killed when the handle drops.
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl ModelChild {
    async fn round_trip(&mut self, line: &str) -> Result<String, ClassifierError> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let mut answer = String::new();
        if self.stdout.read_line(&mut answer).await? == 0 {
            return Err(ClassifierError::Closed);
        }
        Ok(answer)
    }
}

/// A long-lived `fasttext predict-prob <model> - 1` process.
///
/// Requests are serialized: the process answers one line per input line, so
/// only one caller may hold the pipe pair at a time. After any failure the
/// process is dropped and a fresh one is started on the next call.
pub struct FastTextProcess {
    program: PathBuf,
    model: PathBuf,
    answer_timeout: Duration,
    child: Mutex<Option<ModelChild>>,
}

impl FastTextProcess {
    /// Prepares the process; it is started on first use.
    pub fn new(program: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            model: model.into(),
            answer_timeout: DEFAULT_PREDICT_TIMEOUT,
            child: Mutex::new(None),
        }
    }

    /// Overrides how long to wait for each answer.
    pub fn with_timeout(mut self, answer_timeout: Duration) -> Self {
        self.answer_timeout = answer_timeout;
        self
    }

    /// Model file passed to the process.
    pub fn model_path(&self) -> &Path {
        &self.model
    }

    /// Starts the process and asks for one prediction, so a missing binary or
    /// an unloadable model shows up before any page is classified.
    pub async fn warm_up(&self) -> Result<RawPrediction, ClassifierError> {
        let answer = self.predict(WARM_UP_TEXT).await?;
        debug!(raw_label = %answer.raw_label, "classifier answered warm-up");
        Ok(answer)
    }

    fn spawn(&self) -> Result<ModelChild, ClassifierError> {
        let mut child = Command::new(&self.program)
            .arg("predict-prob")
            .arg(&self.model)
            .arg("-")
            .arg("1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ClassifierError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;
        let stdin = child.stdin.take().ok_or(ClassifierError::Closed)?;
        let stdout = child.stdout.take().ok_or(ClassifierError::Closed)?;
        debug!(program = %self.program.display(), model = %self.model.display(), "classifier started");
        Ok(ModelChild {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }
}

#[async_trait]
impl LanguageModel for FastTextProcess {
    async fn predict(&self, text: &str) -> Result<RawPrediction, ClassifierError> {
        let mut slot = self.child.lock().await;
        if slot.is_none() {
            *slot = Some(self.spawn()?);
        }
        let child = slot.as_mut().ok_or(ClassifierError::Closed)?;

        let result = match timeout(self.answer_timeout, child.round_trip(text)).await {
            Ok(answer) => answer.and_then(|line| parse_prediction_line(&line)),
            Err(_) => Err(ClassifierError::Timeout(self.answer_timeout)),
        };
        if let Err(err) = &result {
            if !matches!(err, ClassifierError::Malformed(_)) {
                warn!(error = %err, "restarting classifier process");
                *slot = None;
            }
        }
        result
    }
}

/// A language label and its confidence. Both are `None` when the text was
/// empty, the model failed, or its label could not be parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    /// Parsed `lang_Script` label.
    pub label: Option<String>,
    /// Confidence of `label`.
    pub confidence: Option<f64>,
}

/// Shared adapter over a [`LanguageModel`]; cheap to clone.
#[derive(Clone)]
pub struct LanguageClassifier {
    model: Arc<dyn LanguageModel>,
}

impl LanguageClassifier {
    /// Wraps a loaded model.
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Classifies `text`. Newlines are removed first since the model reads one
    /// line per prediction. Never fails.
    pub async fn predict(&self, text: Option<&str>) -> Prediction {
        let Some(text) = text else {
            return Prediction::default();
        };
        let line: String = text.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();
        if line.trim().is_empty() {
            return Prediction::default();
        }

        match self.model.predict(&line).await {
            Ok(raw) => match parse_label(&raw.raw_label) {
                Some(label) => Prediction {
                    label: Some(label),
                    confidence: Some(raw.confidence),
                },
                None => {
                    debug!(raw_label = %raw.raw_label, "unrecognised label shape");
                    Prediction::default()
                }
            },
            Err(err) => {
                warn!(error = %err, "language prediction failed");
                Prediction::default()
            }
        }
    }
}
