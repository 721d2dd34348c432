use super::project_path;
use super::responses::{IdentityRef, TeamMemberResponse, TeamResponse};
use super::Api;
use crate::http::{escape, ApiError, Params};
use crate::paginate::TOP_PARAM;

impl Api {
    pub fn fetch_teams(&self, project_id: &str) -> Result<Vec<TeamResponse>, ApiError> {
        tracing::info!(project_id, "fetching teams");
        let endpoint = format!("_apis/projects/{}/teams", escape(project_id));
        self.client()
            .paginate_all(&endpoint, Params::new().with(TOP_PARAM, self.page_size()))
            .map_err(|err| err.context(format!("fetching teams for project {project_id}")))
    }

    pub fn fetch_team_members(
        &self,
        project_id: &str,
        team_id: &str,
    ) -> Result<Vec<IdentityRef>, ApiError> {
        let endpoint = format!(
            "_apis/projects/{}/teams/{}/members",
            escape(project_id),
            escape(team_id)
        );
        let members: Vec<TeamMemberResponse> = self
            .client()
            .paginate_all(&endpoint, Params::new().with(TOP_PARAM, self.page_size()))?;
        Ok(members.into_iter().map(|m| m.identity).collect())
    }

    pub(crate) fn team_iterations_endpoint(project_id: &str, team_id: &str) -> String {
        project_path(
            project_id,
            &format!("{}/_apis/work/teamsettings/iterations", escape(team_id)),
        )
    }
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    use crate::api::test_support::harness;

    #[test]
    fn fetches_teams_and_members() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/_apis/projects/p1/teams");
            then.status(200).json_body(json!({
                "count": 1,
                "value": [{ "id": "t1", "name": "Core" }]
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/_apis/projects/p1/teams/t1/members");
            then.status(200).json_body(json!({
                "count": 2,
                "value": [
                    { "identity": { "id": "u1", "displayName": "Ada" } },
                    { "identity": { "id": "u2", "displayName": "Grace" } }
                ]
            }));
        });

        let h = harness(&server);
        let teams = h.api.fetch_teams("p1").expect("teams");
        assert_eq!(teams[0].id, "t1");
        let members = h.api.fetch_team_members("p1", "t1").expect("members");
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].display_name, "Grace");
    }
}
