//! /queue command - show or drop prompts waiting in the active tab

use super::CommandResult;
use skein_session::TabRegistry;

pub struct QueueCommand;

impl QueueCommand {
    /// - No args: list queued prompts
    /// - `drop <n>`: retract the nth queued prompt
    pub fn execute(args: &str, registry: &TabRegistry) -> CommandResult {
        let Some(coordinator) = registry
            .active_tab_id()
            .and_then(|id| registry.coordinator(id))
        else {
            return CommandResult::Message("No active tab.".to_string());
        };
        let queued: Vec<_> = coordinator.queued().iter().collect();

        if args.is_empty() {
            if queued.is_empty() {
                return CommandResult::Message("Queue is empty.".to_string());
            }
            let mut output = format!("{} queued:\n", queued.len());
            for (i, prompt) in queued.iter().enumerate() {
                output.push_str(&format!("{:>3}. {}\n", i + 1, preview(&prompt.text)));
            }
            return CommandResult::Message(output.trim_end().to_string());
        }

        let Some(arg) = args.strip_prefix("drop").map(str::trim) else {
            return CommandResult::Message("Usage: /queue [drop <n>]".to_string());
        };
        match arg.parse::<usize>() {
            Ok(n) if n >= 1 && n <= queued.len() => CommandResult::Retract(queued[n - 1].id.clone()),
            _ => CommandResult::Message(format!("No queued prompt '{}'", arg)),
        }
    }
}

/// First line of a prompt, shortened for listing
fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 60;
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() > MAX_CHARS || text.lines().nth(1).is_some() {
        let short: String = first_line.chars().take(MAX_CHARS).collect();
        format!("{}...", short)
    } else {
        first_line.to_string()
    }
}
