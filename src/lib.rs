//! steploop: a streaming tool-orchestration loop for chat models.
//!
//! A model response is decoded from raw bytes into [`StreamEvent`]s, folded
//! into assistant messages, and recorded as Turns in a [`History`]. The
//! [`ToolLoop`] keeps invoking the model while it asks for tools, holding
//! calls that need a human decision until one arrives.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use steploop::prelude::*;
//!
//! # async fn example() -> steploop::error::Result<()> {
//! let provider = OpenAiCompatibleProvider::new(ProviderConfig::from_env())?;
//! let registry = ToolRegistry::new().with(steploop::tools::builtin::weather_tool());
//! let conversation = Conversation::new(Arc::new(provider), registry);
//!
//! let config = LoopConfig::builder()
//!     .model("gpt-4o-mini")
//!     .tools(vec![AllowedTool::new("weather")])
//!     .build();
//! let mut turn = conversation.submit("Weather in Oslo?", &config).await?;
//! while let Some(event) = turn.next_event().await {
//!     if let LoopEvent::Delta { text } = event {
//!         print!("{text}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod aggregator;
pub mod config;
pub mod decoder;
pub mod error;
pub mod history;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod prelude;
pub mod provider;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use agent_loop::{LoopEvent, ToolLoop, TurnOutcome};
pub use history::History;
pub use types::StreamEvent;
