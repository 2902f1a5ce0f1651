//! Operator commands read from stdin.

use crate::error::{AppError, AppResult};
use crowd_core::EntityKey;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Change the selected temple.
    Select(EntityKey),
    /// Re-fetch one temple's latest reading.
    Refresh(EntityKey),
    /// Log the whole view.
    Show,
    /// Tear down and exit.
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> AppResult<Option<Self>> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Ok(None);
        };
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(AppError::Command(format!("too many arguments: {line}")));
        }

        let command = match (verb, arg) {
            ("select", Some(key)) => Self::Select(EntityKey::parse(key)?),
            ("refresh", Some(key)) => Self::Refresh(EntityKey::parse(key)?),
            ("show", None) => Self::Show,
            ("quit" | "exit", None) => Self::Quit,
            ("select" | "refresh", None) => {
                return Err(AppError::Command(format!("{verb} needs a temple key")))
            }
            _ => return Err(AppError::Command(format!("unknown command: {line}"))),
        };
        Ok(Some(command))
    }
}

/// Forward commands from a line reader until EOF or until the receiver is
/// dropped. EOF is reported as `Quit`.
pub async fn read_commands<R>(reader: R, tx: mpsc::Sender<Command>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Command input closed");
                let _ = tx.send(Command::Quit).await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read command input");
                let _ = tx.send(Command::Quit).await;
                return;
            }
        };

        match Command::parse(&line) {
            Ok(Some(command)) => {
                if tx.send(command).await.is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Ignoring command"),
        }
    }
}
