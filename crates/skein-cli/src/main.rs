//! skein - multi-tab line client for an external coding agent

mod commands;
mod config;
mod process;
mod render;
mod store;
mod translate;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use skein_session::{
    CancelOutcome, CloseOutcome, EventBus, RegistryConfig, Session, SubmitOutcome, TabId, TabRegistry, TabSpec,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::EnvFilter;

use commands::CommandResult;
use process::ProcessGateway;
use render::Renderer;
use store::FileTabStore;
use translate::CommandTranslator;

/// skein - drive a coding agent from several tabs
#[derive(Parser, Debug)]
#[command(name = "skein")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: sonnet)
    #[arg(short, long)]
    model: Option<String>,

    /// Project directory for new tabs (default: current directory)
    #[arg(short = 'C', long)]
    project: Option<PathBuf>,

    /// Open a tab bound to an existing session
    #[arg(long)]
    resume: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Do not restore tabs from the previous run
    #[arg(long)]
    no_restore: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("skein=debug,skein_session=debug,skein_protocol=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = config::Config::load();
    let project_path = match args.project {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let bus = EventBus::new();
    let gateway = Arc::new(ProcessGateway::new(
        bus.clone(),
        config.agent_command(),
        config.agent_args.clone(),
        config.history_dir(),
    ));
    let store = FileTabStore::new(config.state_dir());
    tracing::debug!("Tab list at {}", store.path().display());

    let translation_command = config.translation_command();
    let registry_config = RegistryConfig {
        default_project_path: project_path.clone(),
        default_model: args.model.unwrap_or_else(|| config.model()),
        translation_enabled: translation_command.is_some(),
    };
    let mut registry = TabRegistry::new(gateway, bus.clone(), Box::new(store), registry_config);
    if let Some(command) = translation_command {
        let mut translator = CommandTranslator::new(command);
        if let Some(language) = &config.translation.user_language {
            translator = translator.with_user_language(language);
        }
        registry = registry.with_translator(Arc::new(translator));
    }
    if let Some(hook) = config.checkpoint_hook() {
        registry = registry.with_checkpoint_hook(hook);
    }

    if !args.no_restore {
        if let Err(e) = registry.hydrate().await {
            tracing::warn!("Failed to restore tabs: {}", e);
        }
    }
    if let Some(session_id) = args.resume {
        let spec = TabSpec {
            session: Some(Session::new(session_id, project_path.clone())),
            project_path: Some(project_path.clone()),
            activate: true,
        };
        registry.create_tab(spec).await?;
    }
    if registry.is_empty() {
        registry.create_tab(TabSpec::default()).await?;
    }

    run_interactive(&mut registry, &bus).await
}

async fn run_interactive(registry: &mut TabRegistry, bus: &EventBus) -> anyhow::Result<()> {
    let mut renderer = Renderer::new();
    let mut stdout = std::io::stdout();
    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("skein - type /help for commands");
        eprintln!();
    }
    print_active_header(registry);
    renderer.render_active(registry, &mut stdout)?;

    loop {
        tokio::select! {
            line = lines.next() => {
                let Some(line) = line else {
                    // EOF
                    break;
                };
                let input = line?;
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }

                if let Some(result) = commands::execute_command(input, registry) {
                    if !apply_command(result, registry, &mut renderer).await {
                        break;
                    }
                } else {
                    match registry.submit_to_active(input, None).await {
                        Ok(SubmitOutcome::Sent) => {}
                        Ok(SubmitOutcome::Queued { position }) => {
                            println!("[Queued #{}]", position);
                        }
                        Err(e) => eprintln!("Error: {}", e),
                    }
                }
            }
            _ = bus.notified() => {
                registry.pump().await;
            }
        }
        renderer.render_active(registry, &mut stdout)?;
        stdout.flush()?;
    }

    Ok(())
}

/// Apply a slash command. Returns false when the client should exit.
async fn apply_command(result: CommandResult, registry: &mut TabRegistry, renderer: &mut Renderer) -> bool {
    match result {
        CommandResult::Exit => return false,
        CommandResult::Message(msg) => println!("{}", msg),
        CommandResult::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
        CommandResult::NewTab(project_path) => {
            let spec = TabSpec {
                project_path,
                ..Default::default()
            };
            match registry.create_tab(spec).await {
                Ok(_) => print_active_header(registry),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        CommandResult::Switch(index) => {
            let id = match tab_at(registry, index) {
                Ok(id) => id,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return true;
                }
            };
            match registry.switch_to_tab(&id).await {
                Ok(()) => print_active_header(registry),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        CommandResult::Close { index, force } => {
            let id = match tab_at(registry, index) {
                Ok(id) => id,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return true;
                }
            };
            match registry.close_tab(&id, force).await {
                Ok(CloseOutcome::Closed) => {
                    renderer.forget(&id);
                    if registry.is_empty() {
                        println!("Closed the last tab. Use /new to open one.");
                    } else {
                        print_active_header(registry);
                    }
                }
                Ok(CloseOutcome::NeedsConfirmation) => {
                    println!("Tab {} is busy. Use /close! {} to close it anyway.", index + 1, index + 1);
                }
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        CommandResult::Move { from, to } => {
            if let Err(e) = registry.reorder_tabs(from, to) {
                eprintln!("Error: {}", e);
            }
        }
        CommandResult::Cancel => {
            let Some(coordinator) = registry.active_coordinator_mut() else {
                println!("No active tab.");
                return true;
            };
            match coordinator.cancel().await {
                CancelOutcome::NothingToCancel => println!("Nothing to cancel."),
                CancelOutcome::Cancelled { dropped_prompts } => {
                    println!("Cancelled. Dropped {} queued prompts.", dropped_prompts);
                }
                CancelOutcome::LocalOnly { error, dropped_prompts } => {
                    println!(
                        "Stopped locally ({}). Dropped {} queued prompts.",
                        error, dropped_prompts
                    );
                }
            }
            registry.sync();
        }
        CommandResult::Retract(prompt_id) => {
            let removed = registry
                .active_coordinator_mut()
                .and_then(|c| c.retract(&prompt_id));
            if removed.is_some() {
                println!("Dropped queued prompt.");
            }
            registry.sync();
        }
    }
    true
}

/// Id of the tab at a display position
fn tab_at(registry: &TabRegistry, index: usize) -> skein_session::Result<TabId> {
    let ids = registry.tab_ids();
    let len = ids.len();
    ids.into_iter()
        .nth(index)
        .ok_or(skein_session::Error::InvalidIndex { index, len })
}

fn print_active_header(registry: &TabRegistry) {
    let Some(tab) = registry.tabs().into_iter().find(|t| t.is_active) else {
        return;
    };
    match &tab.session_id {
        Some(id) => println!("== {} (session {}) ==", tab.title, id),
        None => println!("== {} ==", tab.title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commands::test_util::registry_with_tabs;

    #[tokio::test]
    async fn test_tab_at_rejects_out_of_range() {
        let registry = registry_with_tabs(2).await;
        assert_eq!(tab_at(&registry, 1).unwrap(), registry.tab_ids()[1]);
        assert!(matches!(
            tab_at(&registry, 2),
            Err(skein_session::Error::InvalidIndex { index: 2, len: 2 })
        ));
    }

    #[tokio::test]
    async fn test_stale_switch_and_close_keep_running() {
        let mut registry = registry_with_tabs(2).await;
        let mut renderer = Renderer::new();
        let active = registry.active_tab_id().cloned();

        assert!(apply_command(CommandResult::Switch(5), &mut registry, &mut renderer).await);
        assert!(
            apply_command(
                CommandResult::Close { index: 5, force: true },
                &mut registry,
                &mut renderer
            )
            .await
        );
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.active_tab_id().cloned(), active);
    }
}
