//! Test doubles for the command runner and prompter.

use super::command::{CommandOutput, CommandRunner, CommandSpec};
use super::error::{Error, Result};
use super::prompt::{Decision, Prompter};
use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::SecretString;
use std::collections::VecDeque;
use std::time::Duration;

type Responder = Box<dyn Fn(&CommandSpec) -> CommandOutput + Send + Sync>;

/// Records every command and answers from a closure.
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<CommandSpec>>,
    respond: Responder,
}

impl ScriptedRunner {
    pub(crate) fn new(respond: impl Fn(&CommandSpec) -> CommandOutput + Send + Sync + 'static) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        }
    }

    /// Every command succeeds, except `mountpoint -q`, which reports "not mounted".
    pub(crate) fn succeeding() -> Self {
        Self::new(|cmd| {
            if cmd.program() == "mountpoint" {
                CommandOutput::failed(32, "")
            } else {
                CommandOutput::succeeded()
            }
        })
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub(crate) fn rendered(&self) -> Vec<String> {
        self.calls.lock().iter().map(ToString::to_string).collect()
    }

    /// Mount helper invocations (`mount -t cifs ...`).
    pub(crate) fn cifs_mounts(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.program() == "mount" && c.arguments().first().map(String::as_str) == Some("-t"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec, _timeout: Duration) -> Result<CommandOutput> {
        self.calls.lock().push(command.clone());
        Ok((self.respond)(command))
    }
}

/// Replays canned answers; decisions fall back to their interactive default.
#[derive(Default)]
pub(crate) struct ScriptedPrompter {
    decisions: VecDeque<bool>,
    inputs: VecDeque<String>,
    secrets: VecDeque<String>,
    pub(crate) asked: Vec<String>,
}

impl ScriptedPrompter {
    pub(crate) fn with_decisions(mut self, answers: &[bool]) -> Self {
        self.decisions.extend(answers.iter().copied());
        self
    }

    pub(crate) fn with_inputs(mut self, answers: &[&str]) -> Self {
        self.inputs.extend(answers.iter().map(|s| s.to_string()));
        self
    }

    pub(crate) fn with_secrets(mut self, answers: &[&str]) -> Self {
        self.secrets.extend(answers.iter().map(|s| s.to_string()));
        self
    }
}

impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    fn decide(&mut self, decision: &Decision) -> Result<bool> {
        self.asked.push(decision.question.clone());
        Ok(self
            .decisions
            .pop_front()
            .unwrap_or(decision.interactive_default))
    }

    fn input(&mut self, prompt: &str, default: Option<&str>) -> Result<String> {
        self.asked.push(prompt.to_string());
        match self.inputs.pop_front() {
            Some(answer) if !answer.is_empty() => Ok(answer),
            _ => default
                .map(str::to_string)
                .ok_or_else(|| Error::validation("input", "script exhausted")),
        }
    }

    fn secret(&mut self, prompt: &str) -> Result<SecretString> {
        self.asked.push(prompt.to_string());
        self.secrets
            .pop_front()
            .map(SecretString::from)
            .ok_or_else(|| Error::Credential("script exhausted".into()))
    }
}
