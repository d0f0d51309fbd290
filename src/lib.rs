//! Webpilot - an LLM-driven browser agent
//!
//! Drives a Chromium-family browser over the DevTools protocol with a
//! perceive, plan, act and verify loop: the page is sensed into a compact
//! element tree, an oracle picks the next instruction, the executor turns it
//! into input events, and failures are diagnosed by a supervisor.
//!
//! # Architecture
//!
//! - **Core**: configuration, error taxonomy and the shared data model
//! - **LLM**: chat provider abstraction with an OpenAI-compatible client
//! - **Oracle**: instruction, diagnosis and planning contracts
//! - **Browser**: CDP transport, page sensing, action execution and tab tools
//! - **Agent**: orchestrator loop, failure supervisor and task runner
//! - **Bridge**: typed request/response channel into a running agent
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tokio_util::sync::CancellationToken;
//! use webpilot::agent::{Services, TaskRunner};
//! use webpilot::browser::CdpConnection;
//! use webpilot::llm::OpenAiClient;
//! use webpilot::oracle::LlmOracle;
//! use webpilot::Config;
//!
//! #[tokio::main]
//! async fn main() -> webpilot::Result<()> {
//!     let config = Config::load();
//!     let cdp = CdpConnection::connect_to(
//!         &config.browser.host,
//!         config.browser.port,
//!         config.browser.command_timeout(),
//!     )
//!     .await?;
//!     let llm = Arc::new(OpenAiClient::from_config(&config.oracle)?);
//!     let oracle = Arc::new(LlmOracle::new(llm, &config.oracle));
//!
//!     let services = Services::new(Arc::new(cdp), oracle, &config);
//!     let runner = TaskRunner::new(services, config.agent.clone());
//!     let outcome = runner
//!         .run("search for open source licenses", CancellationToken::new())
//!         .await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod bridge;
pub mod browser;
pub mod core;
pub mod llm;
pub mod oracle;

// Re-export commonly used items
pub use agent::{Orchestrator, TaskOutcome, TaskRunner};
pub use core::{Config, PilotError, Result};
