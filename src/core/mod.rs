//! Core module - shared infrastructure for webpilot
//!
//! This module contains configuration, the error taxonomy and the data
//! model exchanged between the sensor, the oracle and the executor.

pub mod config;
pub mod error;
pub mod instruction;
pub mod plan;
pub mod types;
pub mod verdict;

pub use config::Config;
pub use error::{ActionError, CdpError, OracleProtocolError, PilotError, Result, SensorError};
pub use instruction::{Action, ActionKind, Instruction};
pub use plan::{BrowserTask, SubTask, TaskPlan};
pub use types::*;
pub use verdict::SupervisorVerdict;
