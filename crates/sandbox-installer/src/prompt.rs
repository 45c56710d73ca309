//! Terminal prompts.

use inquire::error::InquireError;
use inquire::{Confirm, Password, PasswordDisplayMode, Select, Text};
use sandbox_core::prompt::Prompter;
use sandbox_core::Error;

use crate::Result;

/// [`Prompter`] asking on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn text(&self, message: &str, default: Option<String>) -> Result<String> {
        let mut prompt = Text::new(message);
        if let Some(default) = default.as_deref() {
            prompt = prompt.with_default(default);
        }
        prompt.prompt().map_err(prompt_error)
    }

    fn password(&self, message: &str) -> Result<String> {
        Password::new(message)
            .without_confirmation()
            .with_display_mode(PasswordDisplayMode::Masked)
            .prompt()
            .map_err(prompt_error)
    }

    fn confirm(&self, message: &str, default: bool) -> Result<bool> {
        Confirm::new(message)
            .with_default(default)
            .prompt()
            .map_err(prompt_error)
    }

    fn select(&self, message: &str, options: Vec<String>) -> Result<String> {
        if options.is_empty() {
            return Err(Error::PromptError(format!("Nothing to choose for `{message}`")));
        }
        Select::new(message, options).prompt().map_err(prompt_error)
    }
}

/// Ctrl-C and Escape abort the installer; anything else is a terminal problem.
fn prompt_error(err: InquireError) -> Error {
    match err {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => Error::Interrupted,
        other => Error::PromptError(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_interrupted() {
        assert_eq!(prompt_error(InquireError::OperationInterrupted), Error::Interrupted);
        assert_eq!(prompt_error(InquireError::OperationCanceled), Error::Interrupted);
    }

    #[test]
    fn test_terminal_failure_is_prompt_error() {
        let err = prompt_error(InquireError::NotTTY);
        assert!(matches!(err, Error::PromptError(_)));
        assert_eq!(err.exit_code(), sandbox_core::error::EXIT_FATAL);
    }

    #[test]
    fn test_select_without_options() {
        let err = InquirePrompter.select("Network", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::PromptError(_)));
    }
}
