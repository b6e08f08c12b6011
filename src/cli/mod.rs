//! CLI entry point for steploop.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::agent_loop::{LoopEvent, TurnOutcome};
use crate::config::agents::{AgentCatalog, AgentDefinition};
use crate::config::{AllowedTool, LoopConfig, ProviderConfig};
use crate::error::{Result, StepLoopError};
use crate::types::GenerationSettings;

/// steploop CLI
#[derive(Parser, Debug)]
#[command(name = "steploop", version, about = "Chat with a tool-using model")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat with a model
    Chat(ChatArgs),
    /// List agent definitions
    Agents(AgentsArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Agent id or file stem from the agents directory
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Directory holding agent TOML files
    #[arg(long)]
    pub agents_dir: Option<PathBuf>,

    /// Model id; overrides the agent and STEPLOOP_MODEL
    #[arg(short, long)]
    pub model: Option<String>,

    /// System instructions; overrides the agent
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Maximum model invocations per message
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Ask for one complete response instead of a stream
    #[arg(long)]
    pub no_stream: bool,

    /// MCP server URL whose tools the model may call (repeatable)
    #[arg(long = "mcp-server", value_name = "URL")]
    pub mcp_servers: Vec<String>,

    /// Send one message and exit instead of reading stdin
    pub prompt: Option<String>,
}

/// Arguments for the `agents` subcommand.
#[derive(Parser, Debug)]
pub struct AgentsArgs {
    /// Directory holding agent TOML files
    #[arg(long)]
    pub agents_dir: Option<PathBuf>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Load the catalog from `dir`, or from the default directory when it exists.
pub fn load_catalog(dir: Option<&PathBuf>) -> Result<AgentCatalog> {
    match dir {
        Some(dir) => AgentCatalog::load_dir(dir),
        None => {
            let dir = AgentCatalog::default_dir();
            if dir.is_dir() {
                AgentCatalog::load_dir(&dir)
            } else {
                Ok(AgentCatalog::default())
            }
        }
    }
}

/// Build the run settings from the chosen agent, the provider defaults and
/// the command-line overrides, in increasing precedence.
pub fn resolve_loop_config(args: &ChatArgs, catalog: &AgentCatalog, provider: &ProviderConfig) -> Result<LoopConfig> {
    let agent = select_agent(args, catalog)?;

    let mut config = match agent {
        Some(agent) => agent.to_loop_config(),
        None => LoopConfig::builder()
            .model(String::new())
            .tools(vec![AllowedTool::new("weather"), AllowedTool::new("send_message")])
            .build(),
    };

    if let Some(model) = args.model.clone().or_else(|| {
        config
            .model
            .is_empty()
            .then(|| provider.default_model.clone())
            .flatten()
    }) {
        config.model = model;
    }
    if config.model.is_empty() {
        return Err(StepLoopError::Configuration(
            "no model configured; pass --model or set STEPLOOP_MODEL".into(),
        ));
    }
    if let Some(system) = args.system.clone() {
        config.instructions = Some(system);
    }
    if let Some(max_steps) = args.max_steps {
        config.max_steps = max_steps;
    }
    if let Some(temperature) = args.temperature {
        config.settings = GenerationSettings {
            temperature: Some(temperature),
            ..config.settings
        };
    }
    config.stream = !args.no_stream;
    Ok(config)
}

fn select_agent<'a>(args: &ChatArgs, catalog: &'a AgentCatalog) -> Result<Option<&'a AgentDefinition>> {
    match args.agent.as_deref() {
        Some(id) => catalog
            .find(id)
            .map(Some)
            .ok_or_else(|| StepLoopError::Configuration(format!("unknown agent '{id}'"))),
        None => Ok(catalog.default_agent()),
    }
}

/// MCP servers of the chosen agent followed by those given on the command
/// line, without repeats.
pub fn mcp_server_urls(args: &ChatArgs, catalog: &AgentCatalog) -> Result<Vec<String>> {
    let agent_servers = select_agent(args, catalog)?
        .map(|agent| agent.mcp_servers.as_slice())
        .unwrap_or_default();
    let mut urls: Vec<String> = Vec::new();
    for url in agent_servers.iter().chain(&args.mcp_servers) {
        if !urls.contains(url) {
            urls.push(url.clone());
        }
    }
    Ok(urls)
}

/// Add `names` to the allow-list of `config`, keeping existing entries.
pub fn allow_tools(config: &mut LoopConfig, names: impl IntoIterator<Item = String>) {
    let allowed = config.tools.get_or_insert_with(Vec::new);
    for name in names {
        if !allowed.iter().any(|tool| tool.name == name) {
            allowed.push(AllowedTool::new(name));
        }
    }
}

/// Parse an approval answer. `None` means the answer was not understood.
pub fn parse_decision(answer: &str) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Print one loop event: model text to stdout, everything else to stderr.
pub fn render_event(event: &LoopEvent) {
    match event {
        LoopEvent::Delta { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        LoopEvent::ToolActivity {
            payload, is_error, ..
        } => {
            let mark = if *is_error { "failed" } else { "ok" };
            eprintln!("\n[{} {}] {}", payload.name, mark, truncate(&payload.output_json, 200));
        }
        LoopEvent::Error { message } => eprintln!("\nerror: {message}"),
        LoopEvent::Finished { outcome } => {
            println!();
            match outcome {
                TurnOutcome::StepLimitReached => eprintln!("(step limit reached)"),
                TurnOutcome::Cancelled => eprintln!("(cancelled)"),
                _ => {}
            }
        }
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn chat(args: &[&str]) -> ChatArgs {
        let mut argv = vec!["steploop", "chat"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Chat(args) => args,
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_with_defaults() {
        let args = chat(&[]);
        assert!(args.agent.is_none());
        assert!(args.model.is_none());
        assert!(!args.no_stream);
        assert!(args.prompt.is_none());
    }

    #[test]
    fn parse_chat_with_all_options() {
        let args = chat(&[
            "-a", "ops", "-m", "gpt-4o-mini", "-s", "Be brief", "-t", "0.5", "--max-steps", "3", "--no-stream",
            "hello",
        ]);
        assert_eq!(args.agent.as_deref(), Some("ops"));
        assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(args.max_steps, Some(3));
        assert!(args.no_stream);
        assert_eq!(args.prompt.as_deref(), Some("hello"));
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["steploop"]).is_err());
    }

    #[test]
    fn overrides_apply_over_defaults() {
        let provider = ProviderConfig::default().with_default_model("env-model");
        let config = resolve_loop_config(&chat(&["--max-steps", "2"]), &AgentCatalog::default(), &provider).unwrap();
        assert_eq!(config.model, "env-model");
        assert_eq!(config.max_steps, 2);
        assert_eq!(config.tools.as_ref().map(Vec::len), Some(2));

        let config = resolve_loop_config(&chat(&["-m", "cli-model"]), &AgentCatalog::default(), &provider).unwrap();
        assert_eq!(config.model, "cli-model");
    }

    #[test]
    fn missing_model_and_unknown_agent_are_errors() {
        let provider = ProviderConfig::default();
        assert!(resolve_loop_config(&chat(&[]), &AgentCatalog::default(), &provider).is_err());
        assert!(resolve_loop_config(&chat(&["-a", "ghost", "-m", "m"]), &AgentCatalog::default(), &provider).is_err());
    }

    #[test]
    fn mcp_servers_merge_agent_and_command_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ops.toml"),
            r#"
model = "m"
description = "ops"
instruction = "Be brief."
max_steps = 2
mcp_servers = ["http://a/mcp", "http://b/mcp"]
"#,
        )
        .unwrap();
        let catalog = AgentCatalog::load_dir(dir.path()).unwrap();

        let urls = mcp_server_urls(&chat(&["--mcp-server", "http://b/mcp", "--mcp-server", "http://c/mcp"]), &catalog)
            .unwrap();
        assert_eq!(urls, vec!["http://a/mcp", "http://b/mcp", "http://c/mcp"]);
        assert!(mcp_server_urls(&chat(&[]), &AgentCatalog::default()).unwrap().is_empty());
    }

    #[test]
    fn allowed_tools_are_added_once() {
        let mut config = LoopConfig::builder()
            .model("m")
            .tools(vec![AllowedTool::requiring_approval("search", true)])
            .build();
        allow_tools(&mut config, vec!["search".to_string(), "fetch".to_string()]);
        assert_eq!(
            config.tools.unwrap(),
            vec![AllowedTool::requiring_approval("search", true), AllowedTool::new("fetch")]
        );
    }

    #[test]
    fn decisions_accept_short_and_long_answers() {
        assert_eq!(parse_decision(" Y\n"), Some(true));
        assert_eq!(parse_decision("no"), Some(false));
        assert_eq!(parse_decision("maybe"), None);
    }
}
