//! /tabs, /switch, /close and /move

use super::{CommandResult, parse_position};
use skein_session::{StreamingStatus, TabRegistry, TabView};

pub struct TabsCommand;

impl TabsCommand {
    /// List tabs, marking the active one
    pub fn list(registry: &TabRegistry) -> CommandResult {
        let tabs = registry.tabs();
        if tabs.is_empty() {
            return CommandResult::Message("No open tabs. Use /new to open one.".to_string());
        }

        let mut output = String::new();
        for (i, tab) in tabs.iter().enumerate() {
            output.push_str(&format_tab(i + 1, tab));
            output.push('\n');
        }
        CommandResult::Message(output.trim_end().to_string())
    }

    pub fn switch(args: &str, registry: &TabRegistry) -> CommandResult {
        if args.is_empty() {
            return Self::list(registry);
        }
        match parse_position(args, registry.len()) {
            Ok(index) => CommandResult::Switch(index),
            Err(e) => CommandResult::Message(e),
        }
    }

    /// Without a number, closes the active tab
    pub fn close(args: &str, registry: &TabRegistry, force: bool) -> CommandResult {
        if args.is_empty() {
            let active = registry
                .active_tab_id()
                .and_then(|id| registry.tab_ids().iter().position(|t| t == id));
            return match active {
                Some(index) => CommandResult::Close { index, force },
                None => CommandResult::Message("No open tabs.".to_string()),
            };
        }
        match parse_position(args, registry.len()) {
            Ok(index) => CommandResult::Close { index, force },
            Err(e) => CommandResult::Message(e),
        }
    }

    pub fn reorder(args: &str, registry: &TabRegistry) -> CommandResult {
        let positions: Vec<&str> = args.split_whitespace().collect();
        let [from, to] = positions.as_slice() else {
            return CommandResult::Message("Usage: /move <from> <to>".to_string());
        };
        let len = registry.len();
        match (parse_position(from, len), parse_position(to, len)) {
            (Ok(from), Ok(to)) => CommandResult::Move { from, to },
            (Err(e), _) | (_, Err(e)) => CommandResult::Message(e),
        }
    }
}

fn format_tab(number: usize, tab: &TabView) -> String {
    let marker = if tab.is_active { '*' } else { ' ' };
    let status = match tab.streaming_status {
        StreamingStatus::Idle => "",
        StreamingStatus::Streaming => " [streaming]",
        StreamingStatus::Complete => " [done]",
        StreamingStatus::Error => " [error]",
    };
    let queued = if tab.queued > 0 {
        format!(" (+{} queued)", tab.queued)
    } else {
        String::new()
    };
    format!("{}{:>2}. {}{}{}", marker, number, tab.title, status, queued)
}

#[cfg(test)]
mod tests {
    use super::super::test_util::registry_with_tabs;
    use super::*;

    #[tokio::test]
    async fn test_list_marks_active_tab() {
        let registry = registry_with_tabs(2).await;
        let CommandResult::Message(text) = TabsCommand::list(&registry) else {
            panic!("expected message");
        };
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["  1. Chat 1", "* 2. Chat 2"]);
    }

    #[tokio::test]
    async fn test_close_defaults_to_active() {
        let registry = registry_with_tabs(3).await;
        assert_eq!(
            TabsCommand::close("", &registry, false),
            CommandResult::Close { index: 2, force: false }
        );
        assert_eq!(
            TabsCommand::close("1", &registry, true),
            CommandResult::Close { index: 0, force: true }
        );
        assert!(matches!(TabsCommand::close("9", &registry, false), CommandResult::Message(_)));
    }

    #[tokio::test]
    async fn test_reorder_arguments() {
        let registry = registry_with_tabs(3).await;
        assert_eq!(
            TabsCommand::reorder("3 1", &registry),
            CommandResult::Move { from: 2, to: 0 }
        );
        assert!(matches!(TabsCommand::reorder("3", &registry), CommandResult::Message(_)));
        assert!(matches!(TabsCommand::reorder("1 7", &registry), CommandResult::Message(_)));
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = registry_with_tabs(0).await;
        assert!(matches!(TabsCommand::list(&registry), CommandResult::Message(m) if m.contains("/new")));
        assert!(matches!(TabsCommand::close("", &registry, false), CommandResult::Message(_)));
    }
}
