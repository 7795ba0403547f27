//! Operator interaction.
//!
//! Every yes/no question the pipeline can ask is a [`Decision`] carrying
//! both its interactive default and the answer assumed when running
//! unattended, so the two modes never drift apart silently.

use super::error::{Error, IoContext, Result};
use log::info;
use secrecy::SecretString;
use std::io::{self, BufRead, Write};

/// A yes/no decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Question shown to the operator
    pub question: String,
    /// Answer used when the operator just presses enter
    pub interactive_default: bool,
    /// Answer assumed in unattended mode
    pub unattended: bool,
}

impl Decision {
    /// Creates a decision point.
    pub fn new(question: impl Into<String>, interactive_default: bool, unattended: bool) -> Self {
        Self {
            question: question.into(),
            interactive_default,
            unattended,
        }
    }
}

/// Source of operator answers.
pub trait Prompter {
    /// Whether a human is answering.
    fn is_interactive(&self) -> bool;

    /// Answers a yes/no decision.
    fn decide(&mut self, decision: &Decision) -> Result<bool>;

    /// Reads a line of free text; an empty answer selects `default`.
    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String>;

    /// Reads a secret without echo.
    fn secret(&mut self, prompt: &str) -> Result<SecretString>;
}

/// Asks on the controlling terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    fn read_line(prompt: &str) -> Result<String> {
        let mut stderr = io::stderr();
        write!(stderr, "{}", prompt).context_io(|| "failed to write prompt")?;
        stderr.flush().context_io(|| "failed to write prompt")?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .context_io(|| "failed to read answer")?;
        if read == 0 {
            return Err(Error::Declined("input closed".into()));
        }
        Ok(line.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn decide(&mut self, decision: &Decision) -> Result<bool> {
        let hint = if decision.interactive_default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = Self::read_line(&format!("{} {} ", decision.question, hint))?;
            match answer.to_ascii_lowercase().as_str() {
                "" => return Ok(decision.interactive_default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => eprintln!("Please answer y or n."),
            }
        }
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        let label = match default {
            Some(d) => format!("{} [{}]: ", prompt, d),
            None => format!("{}: ", prompt),
        };
        loop {
            let answer = Self::read_line(&label)?;
            if !answer.is_empty() {
                return Ok(answer);
            }
            if let Some(d) = default {
                return Ok(d.to_string());
            }
        }
    }

    fn secret(&mut self, prompt: &str) -> Result<SecretString> {
        rpassword::prompt_password(format!("{}: ", prompt))
            .map(SecretString::from)
            .map_err(|e| Error::Credential(format!("failed to read password: {}", e)))
    }
}

/// Answers every decision with its unattended answer and refuses to ask
/// for anything else.
#[derive(Debug, Default)]
pub struct UnattendedPrompter;

impl Prompter for UnattendedPrompter {
    fn is_interactive(&self) -> bool {
        false
    }

    fn decide(&mut self, decision: &Decision) -> Result<bool> {
        info!(
            "{} -> {} (non-interactive)",
            decision.question,
            if decision.unattended { "yes" } else { "no" }
        );
        Ok(decision.unattended)
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        default.map(str::to_string).ok_or_else(|| {
            Error::validation("arguments", format!("{} is required in non-interactive mode", prompt))
        })
    }

    fn secret(&mut self, prompt: &str) -> Result<SecretString> {
        Err(Error::validation(
            "arguments",
            format!("{} is required in non-interactive mode", prompt),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unattended_uses_unattended_answer() -> Result<()> {
        let mut prompter = UnattendedPrompter;
        let decision = Decision::new("Mount over existing files?", false, true);
        assert!(prompter.decide(&decision)?);
        assert!(!prompter.is_interactive());
        Ok(())
    }

    #[test]
    fn test_unattended_refuses_secrets() {
        let mut prompter = UnattendedPrompter;
        assert!(matches!(
            prompter.secret("Password"),
            Err(Error::Validation { .. })
        ));
        assert_eq!(prompter.input("Mount point", Some("/mnt/storagebox")).unwrap(), "/mnt/storagebox");
        assert!(prompter.input("Username", None).is_err());
    }
}
