//! Scripted fake runtime for tests.
//!
//! [`ScriptedRunner`] records every command it receives and answers from a
//! list of rules matched against the command's argv prefix. The first matching
//! rule wins; unmatched commands succeed with empty output.

use crate::cmd::{Cmd, Output, Runner};
use crate::error::{Result, RuntimeError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

/// Scripted answer to a command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Succeed with this stdout.
    Stdout(String),
    /// Exit non-zero with this output.
    Fail(String),
    /// Wait, then answer with the inner reply.
    Delay(Duration, Box<Reply>),
}

impl Reply {
    /// Successful reply with the given stdout.
    pub fn stdout(s: impl Into<String>) -> Self {
        Self::Stdout(s.into())
    }

    /// Failing reply with the given output.
    pub fn fail(s: impl Into<String>) -> Self {
        Self::Fail(s.into())
    }

    /// Delay this reply.
    pub fn after(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

type Responder = Box<dyn Fn(&Cmd) -> Reply + Send + Sync>;

struct Rule {
    prefix: Vec<String>,
    respond: Responder,
}

/// Fake [`Runner`] answering from prefix-matched rules.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<Cmd>>,
}

impl fmt::Debug for ScriptedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRunner")
            .field("rules", &self.rules.len())
            .finish()
    }
}

fn to_prefix<I, S>(prefix: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    prefix.into_iter().map(Into::into).collect()
}

fn matches(prefix: &[String], cmd: &Cmd) -> bool {
    let argv: Vec<&str> = cmd.argv().collect();
    argv.len() >= prefix.len() && prefix.iter().zip(&argv).all(|(p, a)| p == a)
}

impl ScriptedRunner {
    /// Runner with no rules: every command succeeds with empty output.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `stdout`.
    pub fn on<I, S>(self, prefix: I, stdout: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stdout = stdout.into();
        self.on_fn(prefix, move |_| Reply::Stdout(stdout.clone()))
    }

    /// Fail commands starting with `prefix` with `output`.
    pub fn fail_on<I, S>(self, prefix: I, output: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let output = output.into();
        self.on_fn(prefix, move |_| Reply::Fail(output.clone()))
    }

    /// Answer commands starting with `prefix` with a fixed reply.
    pub fn reply<I, S>(self, prefix: I, reply: Reply) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_fn(prefix, move |_| reply.clone())
    }

    /// Answer commands starting with `prefix` by calling `f`.
    pub fn on_fn<I, S, F>(mut self, prefix: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Cmd) -> Reply + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            prefix: to_prefix(prefix),
            respond: Box::new(f),
        });
        self
    }

    /// Every command received so far, in arrival order.
    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Commands received so far whose argv starts with `prefix`.
    pub fn calls_matching<I, S>(&self, prefix: I) -> Vec<Cmd>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefix = to_prefix(prefix);
        self.calls()
            .into_iter()
            .filter(|c| matches(&prefix, c))
            .collect()
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(&self, cmd: &Cmd) -> Result<Output> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cmd.clone());

        let mut reply = self
            .rules
            .iter()
            .find(|r| matches(&r.prefix, cmd))
            .map(|r| (r.respond)(cmd))
            .unwrap_or_else(|| Reply::Stdout(String::new()));

        loop {
            match reply {
                Reply::Stdout(s) => return Ok(Output::from_stdout(s)),
                Reply::Fail(output) => {
                    return Err(RuntimeError::Invocation {
                        command: cmd.to_string(),
                        code: Some(1),
                        output,
                    })
                }
                Reply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = ScriptedRunner::new()
            .on(["docker", "inspect", "special"], "first")
            .on(["docker", "inspect"], "second");
        let out = runner
            .run(&Cmd::new("docker").args(["inspect", "special"]))
            .await
            .unwrap();
        assert_eq!(out.stdout_str(), "first");
        let out = runner
            .run(&Cmd::new("docker").args(["inspect", "other"]))
            .await
            .unwrap();
        assert_eq!(out.stdout_str(), "second");
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unmatched_succeeds_empty() {
        let runner = ScriptedRunner::new().fail_on(["docker", "pull"], "nope");
        let out = runner.run(&Cmd::new("docker").arg("ps")).await.unwrap();
        assert!(out.stdout.is_empty());
        assert!(runner
            .run(&Cmd::new("docker").args(["pull", "x"]))
            .await
            .is_err());
    }
}
