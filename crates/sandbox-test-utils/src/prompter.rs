//! Prompter that replays canned answers.

use std::collections::VecDeque;
use std::sync::Mutex;

use sandbox_core::prompt::Prompter;
use sandbox_core::{Error, Result};

/// Answers questions from a fixed queue and records what was asked.
///
/// An empty answer to a text question yields its default; `confirm` accepts
/// `y`, `n` or an empty answer for the default. Running out of answers is a
/// [`Error::PromptError`] so a test fails loudly on an unexpected question.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<String>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
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

    /// Questions asked so far, in order.
    pub fn asked(&self) -> Vec<String> {
        self.asked
            .lock()
            .map(|asked| asked.clone())
            .unwrap_or_default()
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.lock().map_or(0, |answers| answers.len())
    }

    fn next(&self, message: &str) -> Result<String> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(message.to_string());
        }
        self.answers
            .lock()
            .map_err(|_| Error::PromptError("answer queue poisoned".to_string()))?
            .pop_front()
            .ok_or_else(|| Error::PromptError(format!("no scripted answer for `{message}`")))
    }
}

impl Prompter for ScriptedPrompter {
    fn text(&self, message: &str, default: Option<String>) -> Result<String> {
        let answer = self.next(message)?;
        match default {
            Some(default) if answer.is_empty() => Ok(default),
            _ => Ok(answer),
        }
    }

    fn password(&self, message: &str) -> Result<String> {
        self.next(message)
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        let answer = self.next(message)?;
        match answer.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "y" | "yes" => Ok(true),
            "n" | "no" => Ok(false),
            other => Err(Error::PromptError(format!("`{other}` is not a yes/no answer"))),
        }
    }

    fn select(&self, message: &str, options: Vec<String>) -> Result<String> {
        let answer = self.next(message)?;
        if options.contains(&answer) {
            Ok(answer)
        } else {
            Err(Error::PromptError(format!(
                "`{answer}` is not one of {options:?}"
            )))
        }
    }
}
