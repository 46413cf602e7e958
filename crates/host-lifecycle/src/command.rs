//! Command-runner contract (spec.md 4.F): the one place the agent shells
//! out, so the "reject shell metacharacters" and "reject oversized input"
//! rules in spec.md §8 are enforced exactly once.

use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::{instrument, warn};

use crate::error::{Error, Result};

/// Characters that would let a supposedly-fixed argument list escape into
/// shell interpretation if ever passed through a shell. Rejected outright
/// even though we invoke `Command` directly and never go through `/bin/sh`,
/// because scripts and secrets content (spec.md 4.F, 4.B) are written to
/// disk and later sourced by the OS's own init tooling.
const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '$', '`'];

/// Upper bound on a single argument or script body (spec.md §8).
const MAX_INPUT_BYTES: usize = 4096;

/// Validates a string destined to become a command argument or script body.
pub fn validate_input(input: &str) -> Result<()> {
    if input.len() > MAX_INPUT_BYTES {
        return Err(Error::Validation(format!(
            "command input exceeds {MAX_INPUT_BYTES} bytes"
        )));
    }
    if let Some(c) = input.chars().find(|c| FORBIDDEN_CHARS.contains(c)) {
        return Err(Error::Validation(format!(
            "command input contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

/// Runs `program` with `args`, enforcing [`validate_input`] on each
/// argument and failing if the process doesn't exit within `timeout_dur`.
#[instrument(level = "debug", skip(args))]
pub async fn run(program: &str, args: &[&str], timeout_dur: Duration) -> Result<std::process::Output> {
    validate_input(program)?;
    for arg in args {
        validate_input(arg)?;
    }

    let fut = Command::new(program).args(args).output();
    match timeout(timeout_dur, fut).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(Error::Io(e)),
        Err(_) => {
            warn!(program, ?timeout_dur, "command timed out");
            Err(Error::Transient(anyhow::anyhow!(
                "command {program:?} did not complete within {timeout_dur:?}"
            )))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_shell_metacharacters() {
        for bad in ["rm -rf /; echo pwned", "a && b", "a | b", "$(whoami)", "`id`"] {
            assert!(validate_input(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn rejects_oversized_input() {
        let huge = "a".repeat(MAX_INPUT_BYTES + 1);
        assert!(validate_input(&huge).is_err());
    }

    #[test]
    fn accepts_ordinary_arguments() {
        assert!(validate_input("--data-dir=/var/lib/hostlet").is_ok());
    }

    #[tokio::test]
    async fn runs_a_real_command() {
        let out = run("true", &[], Duration::from_secs(5)).await.unwrap();
        assert!(out.status.success());
    }

    #[tokio::test]
    async fn times_out_a_hanging_command() {
        let result = run("sleep", &["5"], Duration::from_millis(50)).await;
        assert!(result.is_err());
    }
}
