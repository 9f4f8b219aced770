//! Slash commands for interactive mode

mod queue;
mod status;
mod tabs;

pub use queue::QueueCommand;
pub use status::StatusCommand;
pub use tabs::TabsCommand;

use std::path::PathBuf;

use skein_session::TabRegistry;

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Show a message to the user (not sent to the agent)
    Message(String),
    /// Open a new tab, optionally in another project
    NewTab(Option<PathBuf>),
    /// Activate the tab at a 0-based index
    Switch(usize),
    /// Close the tab at a 0-based index
    Close { index: usize, force: bool },
    /// Move a tab between 0-based positions
    Move { from: usize, to: usize },
    /// Cancel the active tab's request
    Cancel,
    /// Drop a queued prompt from the active tab
    Retract(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, registry: &TabRegistry) -> Option<CommandResult> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let parts: Vec<&str> = input[1..].splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "new" | "n" => {
            if args.is_empty() {
                CommandResult::NewTab(None)
            } else {
                CommandResult::NewTab(Some(PathBuf::from(args)))
            }
        }

        "tabs" | "t" => TabsCommand::list(registry),

        "switch" | "s" => TabsCommand::switch(args, registry),

        "close" | "w" => TabsCommand::close(args, registry, false),

        "close!" | "w!" => TabsCommand::close(args, registry, true),

        "move" | "mv" => TabsCommand::reorder(args, registry),

        "cancel" | "c" => CommandResult::Cancel,

        "queue" => QueueCommand::execute(args, registry),

        "status" | "st" => StatusCommand::execute(registry),

        _ => CommandResult::Unknown(command),
    })
}

/// Parse a 1-based tab number into a 0-based index
pub(crate) fn parse_position(arg: &str, len: usize) -> Result<usize, String> {
    match arg.parse::<usize>() {
        Ok(n) if n >= 1 && n <= len => Ok(n - 1),
        Ok(n) => Err(format!("No tab {}. Valid range: 1-{}", n, len)),
        Err(_) => Err(format!("Invalid tab number '{}'", arg)),
    }
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /new, /n [path]        Open a new tab (optionally in another project)
  /tabs, /t              List open tabs
  /switch, /s <n>        Switch to tab n
  /close, /w [n]         Close tab n (default: active tab)
  /close!, /w! [n]       Close tab n even if it is busy
  /move, /mv <from> <to> Move a tab to another position
  /cancel, /c            Cancel the active request and clear the queue
  /queue [drop <n>]      Show queued prompts, or drop one
  /status, /st           Show session info and token usage
  /quit, /exit, /q       Exit skein

Anything else is sent to the agent in the active tab. While a request is
running, further prompts are queued and sent in order."#
        .to_string()
}


#[cfg(test)]
mod tests {
    use super::test_util::registry_with_tabs;
    use super::*;

    #[tokio::test]
    async fn test_dispatch() {
        let registry = registry_with_tabs(2).await;
        assert_eq!(execute_command("hello", &registry), None);
        assert_eq!(execute_command("/q", &registry), Some(CommandResult::Exit));
        assert_eq!(execute_command("/cancel", &registry), Some(CommandResult::Cancel));
        assert_eq!(execute_command("/new", &registry), Some(CommandResult::NewTab(None)));
        assert_eq!(
            execute_command("/new /srv/app", &registry),
            Some(CommandResult::NewTab(Some(PathBuf::from("/srv/app"))))
        );
        assert_eq!(execute_command("/s 2", &registry), Some(CommandResult::Switch(1)));
        assert_eq!(
            execute_command("/frobnicate", &registry),
            Some(CommandResult::Unknown("frobnicate".into()))
        );
        assert!(matches!(execute_command("/help", &registry), Some(CommandResult::Message(_))));
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1", 3), Ok(0));
        assert_eq!(parse_position("3", 3), Ok(2));
        assert!(parse_position("0", 3).is_err());
        assert!(parse_position("4", 3).is_err());
        assert!(parse_position("x", 3).is_err());
    }
}
