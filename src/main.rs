//! steploop CLI binary entry point.

use std::sync::Arc;

use steploop::cli::{self, AgentsArgs, ChatArgs, Cli, Commands};
use steploop::config::{LoopConfig, ProviderConfig};
use steploop::mcp::load_mcp_tools;
use steploop::provider::OpenAiCompatibleProvider;
use steploop::session::{Conversation, TurnHandle};
use steploop::tools::{Tool, ToolRegistry};
use steploop::types::ApprovalDecision;
use steploop::LoopEvent;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();
    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Agents(args) => handle_agents(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn handle_agents(args: AgentsArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = cli::load_catalog(args.agents_dir.as_ref())?;
    if catalog.is_empty() {
        eprintln!("no agents found");
    }
    for agent in catalog.definitions() {
        let id = agent.id.as_deref().or(agent.name.as_deref()).unwrap_or("-");
        let state = if agent.enabled { "" } else { " (disabled)" };
        println!("{id}\t{}\t{}{state}", agent.model, agent.description);
    }
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let provider_config = ProviderConfig::from_env();
    let catalog = cli::load_catalog(args.agents_dir.as_ref())?;
    let mut config = cli::resolve_loop_config(&args, &catalog, &provider_config)?;
    let provider = OpenAiCompatibleProvider::new(provider_config)?;

    let mut registry = ToolRegistry::new();
    registry.register_all(steploop::tools::builtin::all_tools());

    let mcp_servers = cli::mcp_server_urls(&args, &catalog)?;
    if !mcp_servers.is_empty() {
        let remote = load_mcp_tools(&mcp_servers, None).await?;
        cli::allow_tools(&mut config, remote.iter().map(|tool| tool.name().to_string()));
        registry.register_all(remote);
    }
    let conversation = Conversation::new(Arc::new(provider), registry);
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if let Some(prompt) = args.prompt {
        let handle = conversation.submit(prompt, &config).await?;
        drive(&conversation, handle, &config, &mut input).await?;
        return Ok(());
    }

    eprintln!("model: {} (empty line or Ctrl-D to quit)", config.model);
    loop {
        eprint!("> ");
        let Some(line) = input.next_line().await? else { break };
        if line.trim().is_empty() {
            break;
        }
        let handle = conversation.submit(line, &config).await?;
        drive(&conversation, handle, &config, &mut input).await?;
    }
    Ok(())
}

/// Render a turn, asking on stdin for every approval it requests. A resumed
/// run after the last decision is driven the same way.
async fn drive(
    conversation: &Conversation,
    mut handle: TurnHandle,
    config: &LoopConfig,
    input: &mut Input,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        let mut resumed = None;
        while let Some(event) = tokio::select! {
            event = handle.next_event() => event,
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
                handle.next_event().await
            }
        } {
            cli::render_event(&event);
            if let LoopEvent::ApprovalRequested { approval, .. } = event {
                let approved = ask(input, &approval.call.name, &approval.call.input.to_string()).await?;
                let decision = ApprovalDecision {
                    approval_id: approval.approval_id,
                    approved,
                };
                if let Some(next) = conversation.decide(decision, config).await? {
                    resumed = Some(next);
                }
            }
        }
        match resumed {
            Some(next) => handle = next,
            None => return Ok(()),
        }
    }
}

async fn ask(input: &mut Input, tool: &str, args: &str) -> Result<bool, Box<dyn std::error::Error>> {
    loop {
        eprint!("\nallow {tool} {args}? [y/n] ");
        let Some(line) = input.next_line().await? else {
            return Ok(false);
        };
        if let Some(approved) = cli::parse_decision(&line) {
            return Ok(approved);
        }
    }
}
