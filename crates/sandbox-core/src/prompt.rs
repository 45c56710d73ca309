//! Operator prompt seam.
//!
//! The installer asks the operator for values it cannot derive. Components
//! take a `&dyn Prompter` so the terminal front end can be swapped for a
//! scripted one in tests. Implementations map an operator abort (Ctrl-C,
//! Escape) to [`Error::Interrupted`](crate::Error::Interrupted).

use crate::error::Result;

/// Asks the operator for input.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait Prompter: Send + Sync {
    /// Free-text input. An empty answer yields `default` when one is given.
    ///
    /// # Errors
    ///
    /// Fails when the operator aborts or the terminal is unusable.
    fn text(&self, message: &str, default: Option<String>) -> Result<String>;

    /// Hidden input.
    ///
    /// # Errors
    ///
    /// Fails when the operator aborts or the terminal is unusable.
    fn password(&self, message: &str) -> Result<String>;

    /// Yes/no question.
    ///
    /// # Errors
    ///
    /// Fails when the operator aborts or the terminal is unusable.
    fn confirm(&self, message: &str, default: bool) -> Result<bool>;

    /// Pick one of `options`; returns the chosen option.
    ///
    /// # Errors
    ///
    /// Fails when the operator aborts, the terminal is unusable or `options`
    /// is empty.
    fn select(&self, message: &str, options: Vec<String>) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_mock_prompter() {
        let mut prompter = MockPrompter::new();
        prompter
            .expect_text()
            .returning(|_, default| Ok(default.unwrap_or_default()));
        prompter
            .expect_confirm()
            .returning(|_, _| Err(Error::Interrupted));

        let dyn_prompter: &dyn Prompter = &prompter;
        assert_eq!(
            dyn_prompter
                .text("Hostname", Some("localhost".to_string()))
                .unwrap(),
            "localhost"
        );
        assert_eq!(dyn_prompter.confirm("Continue?", true), Err(Error::Interrupted));
    }
}
