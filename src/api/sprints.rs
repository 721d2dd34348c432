use std::collections::HashSet;

use super::responses::{SprintResponse, TeamResponse, ValueList};
use super::Api;
use crate::http::{ApiError, Params};
use crate::model::{Entity, Sprint, SprintStatus};

impl Api {
    pub fn fetch_team_sprints(
        &self,
        project_id: &str,
        team_id: &str,
    ) -> Result<Vec<SprintResponse>, ApiError> {
        let endpoint = Api::team_iterations_endpoint(project_id, team_id);
        let list: ValueList<SprintResponse> = self.client().get(&endpoint, Params::new())?;
        Ok(list.value)
    }

    pub fn sprint_entity(&self, sprint: &SprintResponse) -> Sprint {
        let ids = self.ids();
        let status = SprintStatus::from_time_frame(&sprint.attributes.time_frame);
        Sprint {
            id: ids.sprint(&sprint.path),
            ref_id: sprint.path.clone(),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            name: sprint.name.clone(),
            status,
            started_date: sprint.attributes.start_date,
            ended_date: sprint.attributes.finish_date,
            completed_date: match status {
                SprintStatus::Closed => sprint.attributes.finish_date,
                _ => None,
            },
        }
    }

    /// Writes each team's iterations once; teams sharing an iteration path
    /// produce a single sprint. Returns the number written.
    pub fn write_sprints(&self, project_id: &str, teams: &[TeamResponse]) -> Result<usize, ApiError> {
        let mut seen = HashSet::new();
        for team in teams {
            let sprints = self
                .fetch_team_sprints(project_id, &team.id)
                .map_err(|err| err.context(format!("fetching sprints for team {}", team.name)))?;
            for sprint in sprints {
                if sprint.path.is_empty() || !seen.insert(sprint.path.clone()) {
                    continue;
                }
                self.write(Entity::Sprint(self.sprint_entity(&sprint)))?;
            }
        }
        tracing::info!(project_id, count = seen.len(), "wrote sprints");
        Ok(seen.len())
    }
}
