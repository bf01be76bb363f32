//! Operator command parsing.

use anyhow::bail;
use smartlock_core::TagId;
use smartlock_sync::SyncError;

pub const HELP: &str = "\
Commands:
  list            show the tag list
  status          show connection and pending operations
  add             put the lock in add mode, then present a card
  delete <id>     remove a tag (asks for confirmation)
  open            open the door
  refresh         ask the lock for its tag list
  help            show this help
  quit            exit";

/// One line of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    List,
    Status,
    Add,
    Delete(TagId),
    Open,
    Refresh,
    Help,
    Quit,
}

impl std::str::FromStr for ReplCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            bail!("empty command");
        };

        let command = match word.to_lowercase().as_str() {
            "list" | "ls" => ReplCommand::List,
            "status" => ReplCommand::Status,
            "add" => ReplCommand::Add,
            "delete" | "del" | "rm" => {
                // The rest of the line is the id; UIDs may be spaced hex.
                let id = words.by_ref().collect::<Vec<_>>().join(" ");
                if id.is_empty() {
                    bail!("usage: delete <id>");
                }
                let tag = TagId::parse(&id).map_err(SyncError::from)?;
                return Ok(ReplCommand::Delete(tag));
            }
            "open" => ReplCommand::Open,
            "refresh" => ReplCommand::Refresh,
            "help" | "?" => ReplCommand::Help,
            "quit" | "exit" | "q" => ReplCommand::Quit,
            other => bail!("unknown command '{}', try 'help'", other),
        };

        if words.next().is_some() {
            bail!("too many arguments for '{}'", word);
        }

        Ok(command)
    }
}

/// Interprets an answer to a yes/no prompt. Anything but yes is no.
pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
