//! Explicit service wiring
//!
//! Everything a task needs is built once here and handed to the
//! orchestrator and runner; nothing is looked up globally.

use std::sync::Arc;

use crate::browser::{ActionExecutor, CdpTransport, PageSensor, TabTools, TargetTracker};
use crate::core::Config;
use crate::oracle::{DiagnosisOracle, InstructionOracle, TaskPlanner};

#[derive(Clone)]
pub struct Services {
    pub tracker: Arc<TargetTracker>,
    pub sensor: Arc<PageSensor>,
    pub executor: Arc<ActionExecutor>,
    pub tabs: Arc<TabTools>,
    pub instructions: Arc<dyn InstructionOracle>,
    pub diagnosis: Arc<dyn DiagnosisOracle>,
    pub planner: Arc<dyn TaskPlanner>,
}

impl Services {
    /// Wire every oracle role to one implementation
    pub fn new<O>(transport: Arc<dyn CdpTransport>, oracle: Arc<O>, config: &Config) -> Self
    where
        O: InstructionOracle + DiagnosisOracle + TaskPlanner + 'static,
    {
        Self::with_oracles(
            transport,
            oracle.clone(),
            oracle.clone(),
            oracle,
            config,
        )
    }

    /// Wire each oracle role separately
    pub fn with_oracles(
        transport: Arc<dyn CdpTransport>,
        instructions: Arc<dyn InstructionOracle>,
        diagnosis: Arc<dyn DiagnosisOracle>,
        planner: Arc<dyn TaskPlanner>,
        config: &Config,
    ) -> Self {
        let tracker = Arc::new(TargetTracker::new(transport));
        let sensor = Arc::new(PageSensor::new(
            Arc::clone(&tracker),
            config.browser.clone(),
        ));
        let executor = Arc::new(ActionExecutor::new(
            Arc::clone(&tracker),
            config.browser.clone(),
            config.agent.default_wait(),
            sensor.generations(),
        ));
        let tabs = Arc::new(TabTools::new(Arc::clone(&tracker)));

        Self {
            tracker,
            sensor,
            executor,
            tabs,
            instructions,
            diagnosis,
            planner,
        }
    }
}
