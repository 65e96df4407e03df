use std::collections::VecDeque;
use std::fmt::Debug;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

pub const INTERSECT_PROMPT: &str = "Enter the name for the intersect output layer: ";
pub const SUBTITLE_PROMPT: &str = "Enter the subtitle for the map: ";
pub const MAX_SUBTITLE_CHARS: usize = 100;

/// Source of answers to the run's interactive questions.
pub trait InputProvider: Debug {
    fn prompt(&self, message: &str) -> io::Result<String>;
}

/// Asks on stdout and reads one line from stdin.
#[derive(Debug, Default)]
pub struct StdinPrompt;

impl InputProvider for StdinPrompt {
    fn prompt(&self, message: &str) -> io::Result<String> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(message.as_bytes())?;
        stdout.flush()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Replays canned answers in order; answers run out as empty strings.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far.
    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl InputProvider for ScriptedInput {
    fn prompt(&self, message: &str) -> io::Result<String> {
        self.asked
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message.to_string());
        Ok(self
            .answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}

/// Uses `configured` when present, otherwise asks.
pub fn answer_or_prompt(
    configured: Option<&str>,
    input: &dyn InputProvider,
    message: &str,
) -> io::Result<String> {
    match configured {
        Some(answer) => Ok(answer.to_string()),
        None => input.prompt(message),
    }
}

/// Trims a map subtitle and caps its length.
pub fn sanitize_subtitle(raw: &str) -> String {
    raw.trim().chars().take(MAX_SUBTITLE_CHARS).collect::<String>().trim_end().to_string()
}
