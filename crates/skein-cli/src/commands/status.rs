//! /status command - show the active tab's session and usage

use super::CommandResult;
use skein_protocol::MessageKind;
use skein_session::TabRegistry;

pub struct StatusCommand;

impl StatusCommand {
    pub fn execute(registry: &TabRegistry) -> CommandResult {
        let Some(id) = registry.active_tab_id() else {
            return CommandResult::Message("No active tab.".to_string());
        };
        let (Some(record), Some(coordinator)) = (registry.record(id), registry.coordinator(id)) else {
            return CommandResult::Message("No active tab.".to_string());
        };
        let transcript = coordinator.transcript();
        let usage = &transcript.total_usage;

        let mut output = format!("Tab: {}\n", record.title);
        output.push_str(&"-".repeat(40));
        output.push('\n');

        match coordinator.session() {
            Some(session) => {
                output.push_str(&format!("Session:    {}\n", session.id));
                output.push_str(&format!("Project:    {}\n", session.project_path.display()));
            }
            None => {
                output.push_str("Session:    (new)\n");
                output.push_str(&format!(
                    "Project:    {}\n",
                    coordinator.config().project_path.display()
                ));
            }
        }
        let model = transcript
            .init
            .as_ref()
            .and_then(|init| init.payload.get("model"))
            .and_then(|m| m.as_str())
            .unwrap_or(coordinator.config().default_model.as_str());
        output.push_str(&format!("Model:      {}\n", model));
        output.push_str(&format!("State:      {:?}\n", coordinator.state()));
        output.push_str(&format!("Queued:     {}\n", coordinator.queued().len()));
        output.push('\n');

        let count = |kind: MessageKind| transcript.messages.iter().filter(|m| m.kind == kind).count();
        output.push_str(&format!("Messages:   {} total\n", transcript.messages.len()));
        output.push_str(&format!(
            "            {} user, {} assistant\n",
            count(MessageKind::User),
            count(MessageKind::Assistant)
        ));
        output.push('\n');

        output.push_str("Token Usage:\n");
        output.push_str(&format!("  Input:       {:>8}\n", format_number(usage.input)));
        output.push_str(&format!("  Output:      {:>8}\n", format_number(usage.output)));
        if usage.cache_read > 0 {
            output.push_str(&format!("  Cache read:  {:>8}\n", format_number(usage.cache_read)));
        }
        if usage.cache_write > 0 {
            output.push_str(&format!("  Cache write: {:>8}\n", format_number(usage.cache_write)));
        }

        if let Some(error) = &transcript.last_error {
            output.push_str(&format!("\nLast error: {}\n", error));
        }

        CommandResult::Message(output)
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000 {
        format!("{:.1}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.1}k", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::registry_with_tabs;
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.5k");
        assert_eq!(format_number(2_000_000), "2.0M");
    }

    #[tokio::test]
    async fn test_status_of_fresh_tab() {
        let registry = registry_with_tabs(1).await;
        let CommandResult::Message(text) = StatusCommand::execute(&registry) else {
            panic!("expected message");
        };
        assert!(text.starts_with("Tab: Chat 1"));
        assert!(text.contains("Session:    (new)"));
        assert!(text.contains("Model:      sonnet"));
        assert!(text.contains("State:      Idle"));
    }

    #[tokio::test]
    async fn test_status_without_tabs() {
        let registry = registry_with_tabs(0).await;
        assert_eq!(
            StatusCommand::execute(&registry),
            CommandResult::Message("No active tab.".to_string())
        );
    }
}
