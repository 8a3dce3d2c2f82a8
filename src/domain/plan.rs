//! Optional acceptance-criteria and integration-verification plan.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acceptance criteria attached to one subtask, plus an optional integration-test plan
/// spanning the whole swarm.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub acceptance_criteria: Vec<(Uuid, Vec<String>)>,
    pub integration_plan: Option<IntegrationPlan>,
}

/// Ordered integration-test steps run after the wave loop completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationPlan {
    pub steps: Vec<IntegrationStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationStep {
    pub description: String,
    pub command: String,
    pub expected_result_hint: String,
    pub required: bool,
}

impl Plan {
    #[must_use]
    pub fn criteria_for(&self, task_id: Uuid) -> Option<&[String]> {
        self.acceptance_criteria
            .iter()
            .find(|(id, _)| *id == task_id)
            .map(|(_, criteria)| criteria.as_slice())
    }
}
