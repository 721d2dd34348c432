use super::responses::RepoResponse;
use super::{project_path, Api};
use crate::http::{ApiError, Params};
use crate::model::{Entity, Repo};
use crate::paginate::TOP_PARAM;

const BRANCH_PREFIX: &str = "refs/heads/";

/// Strips the `refs/heads/` prefix from a branch ref.
pub(crate) fn branch_name(git_ref: &str) -> String {
    git_ref.strip_prefix(BRANCH_PREFIX).unwrap_or(git_ref).to_string()
}

impl Api {
    pub fn fetch_repos(&self, project_id: &str) -> Result<Vec<RepoResponse>, ApiError> {
        tracing::info!(project_id, "fetching repos");
        self.client()
            .paginate_all(
                &project_path(project_id, "_apis/git/repositories"),
                Params::new().with(TOP_PARAM, self.page_size()),
            )
            .map_err(|err| err.context(format!("fetching repos for project {project_id}")))
    }

    pub fn repo_entity(&self, repo: &RepoResponse) -> Repo {
        let ids = self.ids();
        let name = if repo.name.starts_with(&repo.project.name) {
            repo.name.clone()
        } else {
            format!("{}/{}", repo.project.name, repo.name)
        };
        Repo {
            id: ids.repo(&repo.id),
            ref_id: repo.id.clone(),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            name,
            default_branch: branch_name(&repo.default_branch),
            url: repo.remote_url.clone(),
            active: true,
        }
    }

    /// Writes every repo of the project and returns the listing.
    pub fn write_repos(&self, project_id: &str) -> Result<Vec<RepoResponse>, ApiError> {
        let repos = self.fetch_repos(project_id)?;
        for repo in &repos {
            self.write(Entity::Repo(self.repo_entity(repo)))?;
        }
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::api::test_support::harness;

    #[test]
    fn names_are_prefixed_with_project() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/p1/_apis/git/repositories");
            then.status(200).json_body(json!({
                "count": 2,
                "value": [
                    {
                        "id": "r1",
                        "name": "api",
                        "defaultBranch": "refs/heads/main",
                        "remoteUrl": "https://x/_git/api",
                        "project": { "id": "p1", "name": "Alpha" }
                    },
                    {
                        "id": "r2",
                        "name": "Alpha",
                        "project": { "id": "p1", "name": "Alpha" }
                    }
                ]
            }));
        });

        let h = harness(&server);
        let repos = h.api.write_repos("p1").expect("repos");
        assert_eq!(repos.len(), 2);

        let first = h.api.repo_entity(&repos[0]);
        assert_eq!(first.name, "Alpha/api");
        assert_eq!(first.default_branch, "main");
        assert_eq!(first.url, "https://x/_git/api");
        assert_eq!(h.api.repo_entity(&repos[1]).name, "Alpha");
        assert_eq!(h.pipe.count("repo"), 2);
    }

    #[test]
    fn branch_prefix_is_optional() {
        assert_eq!(branch_name("refs/heads/feature/x"), "feature/x");
        assert_eq!(branch_name("main"), "main");
    }
}
