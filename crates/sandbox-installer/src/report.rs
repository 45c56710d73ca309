//! Turning the outcome of a command into a log line and an exit code.

use sandbox_core::error::{EXIT_FATAL, EXIT_INTERRUPTED};
use sandbox_core::Error;
use tracing::{error, info};

/// Log a failed command and return the process exit code.
///
/// Operator interruption is a single info line. Errors that point at the
/// environment are logged with their whole context chain; everything else
/// on one line.
pub fn report(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(Error::Interrupted) => {
            info!("interrupted by operator");
            EXIT_INTERRUPTED
        }
        Some(e) => {
            if e.should_log() {
                error!(code = e.error_code(), "{err:?}");
            } else {
                error!(code = e.error_code(), "{err:#}");
            }
            e.exit_code()
        }
        None => {
            error!("{err:#}");
            EXIT_FATAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn wrapped(err: Error) -> anyhow::Error {
        Err::<(), _>(err)
            .context("Failed to install")
            .unwrap_err()
    }

    #[test]
    fn test_interrupted_exits_with_one() {
        assert_eq!(report(&wrapped(Error::Interrupted)), 1);
        assert_eq!(report(&anyhow::Error::from(Error::Interrupted)), 1);
    }

    #[test]
    fn test_backend_failures_are_fatal() {
        let failed = Error::CommandFailed {
            command: "oneimage show 7 --json".to_string(),
            code: 255,
            stderr: "boom".to_string(),
        };
        assert_eq!(report(&wrapped(failed)), 255);
        assert_eq!(report(&wrapped(Error::malformed("image 7", "IMAGE"))), 255);
    }

    #[test]
    fn test_foreign_errors_are_fatal() {
        assert_eq!(report(&anyhow::anyhow!("cannot read installer.yaml")), 255);
    }
}
