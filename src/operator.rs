use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

pub const SESSION_END_COMMANDS: &[&str] = &["quit", "bye", "exit", "stop"];

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("operator input failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("operator did not answer within {0:?}")]
    Timeout(Duration),
    #[error("operator input closed")]
    Closed,
}

/// Line-oriented channel to the human supervising a run.
#[async_trait]
pub trait Operator: Send + Sync {
    fn show(&self, text: &str);
    async fn ask(&self, prompt: &str) -> Result<String, OperatorError>;
}

pub fn is_quit_command(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    SESSION_END_COMMANDS.contains(&reply.as_str())
}

pub fn is_affirmative(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "yes" | "y")
}

pub fn header(text: &str, width: usize) -> String {
    let rule = "=".repeat(width);
    format!("{rule}\n{text}\n{rule}")
}

/// Reads answers from stdin and prints to stdout.
pub struct ConsoleOperator {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    timeout: Option<Duration>,
}

impl ConsoleOperator {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()), timeout }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    fn show(&self, text: &str) {
        println!("{text}");
    }

    async fn ask(&self, prompt: &str) -> Result<String, OperatorError> {
        let mut out = tokio::io::stdout();
        out.write_all(prompt.as_bytes()).await?;
        out.flush().await?;

        let mut lines = self.lines.lock().await;
        let line = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, lines.next_line())
                .await
                .map_err(|_| OperatorError::Timeout(limit))??,
            None => lines.next_line().await?,
        };
        line.map(|l| l.trim().to_string()).ok_or(OperatorError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quit_commands_are_case_insensitive() {
        for cmd in ["quit", " BYE ", "Exit", "stop"] {
            assert!(is_quit_command(cmd), "{cmd}");
        }
        assert!(!is_quit_command("stop the car"));
        assert!(!is_quit_command(""));
    }

    #[test]
    fn only_yes_is_affirmative() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative(" Y "));
        assert!(!is_affirmative("no"));
        assert!(!is_affirmative("sure"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn header_wraps_text_in_rules() {
        assert_eq!(header("RISK", 4), "====\nRISK\n====");
    }
}
