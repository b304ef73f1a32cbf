//! Run file
//!
//! A JSON document describing one run. Every section is optional:
//!
//! ```json
//! {
//!   "simulation": { "end": 600.0, "dt": 60.0, "convergence_policy": "abort" },
//!   "convergence": { "tolerance": 1e-8, "max_iterations": 200 },
//!   "network": { "nodes": 4, "conductance": 2.0 },
//!   "storm": { "node": 0, "blocks": [{ "start": 0.0, "intensity": 10.0 }], "end": 300.0 },
//!   "report_stride": 1
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use chat_ecs::{ConvergenceConfig, SimulationConfig};

use crate::network::{NetworkConfig, Storm};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub simulation: SimulationConfig,
    pub convergence: ConvergenceConfig,
    pub network: NetworkConfig,
    pub storm: Option<Storm>,
    pub report_stride: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            convergence: ConvergenceConfig::default(),
            network: NetworkConfig::default(),
            storm: None,
            report_stride: 1,
        }
    }
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read run file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse run file {}", path.display()))
    }
}
