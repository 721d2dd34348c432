use super::repos::branch_name;
use super::responses::{CommitDetailResponse, PullRequestCommitRef, PullRequestResponse, ValueList};
use super::{project_path, Api};
use crate::checkpoint::SyncMode;
use crate::http::{escape, ApiError, Params};
use crate::model::{Entity, PullRequest, PullRequestCommit, PullRequestStatus};
use crate::paginate::TOP_PARAM;

const PULL_REQUEST_PAGE_SIZE: usize = 1000;
// the commits listing is not paginated
const COMMIT_LIST_LIMIT: usize = 10_000;

const VOTE_REJECTED: i64 = -10;
const VOTE_APPROVED: i64 = 10;

/// Browser url of a pull request, derived from its api url.
pub(crate) fn web_url(api_url: &str) -> String {
    api_url
        .to_lowercase()
        .replacen("_apis/git/repositories", "_git", 1)
        .replacen("/pullrequests/", "/pullrequest/", 1)
}

fn is_active(pr: &PullRequestResponse) -> bool {
    pr.status == "active"
}

fn last_modified(pr: &PullRequestResponse) -> Option<chrono::DateTime<chrono::Utc>> {
    pr.creation_date.max(pr.closed_date)
}

impl Api {
    /// Exports the pull requests of one repo that changed since the
    /// checkpoint (all of them on a historical run). Returns how many were
    /// processed.
    pub fn fetch_pull_requests(
        &self,
        project_id: &str,
        repo_id: &str,
        mode: &SyncMode,
    ) -> Result<usize, ApiError> {
        tracing::info!(project_id, repo_id, "fetching pull requests");
        let endpoint = project_path(
            project_id,
            &format!("_apis/git/repositories/{}/pullrequests", escape(repo_id)),
        );
        let params = Params::new()
            .with(TOP_PARAM, PULL_REQUEST_PAGE_SIZE)
            .with("status", "all");
        let listed: Vec<PullRequestResponse> = self
            .client()
            .paginate_all(&endpoint, params)
            .map_err(|err| err.context(format!("listing pull requests for repo {repo_id}")))?;

        let selected: Vec<PullRequestResponse> = listed
            .into_iter()
            .filter(|pr| mode.should_refresh(last_modified(pr), is_active(pr)))
            .collect();
        self.process_pull_requests(project_id, repo_id, selected)
    }

    /// Single pull request by native id.
    pub fn fetch_pull_request(
        &self,
        project_id: &str,
        repo_id: &str,
        pull_request_id: i64,
    ) -> Result<PullRequestResponse, ApiError> {
        let endpoint = project_path(
            project_id,
            &format!(
                "_apis/git/repositories/{}/pullrequests/{pull_request_id}",
                escape(repo_id)
            ),
        );
        self.client().get(&endpoint, Params::new())
    }

    /// Commits first, then the pull request records, then review threads.
    pub fn process_pull_requests(
        &self,
        project_id: &str,
        repo_id: &str,
        pull_requests: Vec<PullRequestResponse>,
    ) -> Result<usize, ApiError> {
        let count = pull_requests.len();
        let pull_requests: Vec<PullRequestResponse> = pull_requests
            .into_iter()
            .map(|mut pr| {
                pr.url = web_url(&pr.url);
                pr
            })
            .collect();

        let commits = self.batch();
        for pr in &pull_requests {
            let api = self.clone();
            let project = project_id.to_string();
            let repo = repo_id.to_string();
            let pr = pr.clone();
            commits.submit(move || {
                api.write_pull_request_with_commits(&project, &repo, &pr)
                    .map_err(|err| {
                        err.context(format!(
                            "fetching commits for pull request {} in repo {repo}",
                            pr.pull_request_id
                        ))
                    })
            });
        }
        commits.wait()?;

        let threads = self.batch();
        for pr in pull_requests {
            let api = self.clone();
            let project = project_id.to_string();
            let repo = repo_id.to_string();
            threads.submit(move || {
                api.write_pull_request_threads(&project, &repo, &pr)
                    .map_err(|err| {
                        err.context(format!(
                            "fetching threads for pull request {} in repo {repo}",
                            pr.pull_request_id
                        ))
                    })
            });
        }
        threads.wait()?;

        tracing::debug!(project_id, repo_id, count, "processed pull requests");
        Ok(count)
    }

    fn write_pull_request_with_commits(
        &self,
        project_id: &str,
        repo_id: &str,
        pr: &PullRequestResponse,
    ) -> Result<(), ApiError> {
        let pr_ref = self
            .translator()
            .pull_request_ref_id(project_id, repo_id, pr.pull_request_id)?;

        let endpoint = format!(
            "_apis/git/repositories/{}/pullRequests/{}/commits",
            escape(repo_id),
            pr.pull_request_id
        );
        let listed: ValueList<PullRequestCommitRef> = self
            .client()
            .get(&endpoint, Params::new().with(TOP_PARAM, COMMIT_LIST_LIMIT))?;
        let shas: Vec<String> = listed.value.into_iter().map(|c| c.commit_id).collect();

        let branch = branch_name(&pr.source_branch);
        let ids = self.ids();
        for sha in &shas {
            let detail = self.fetch_commit(repo_id, sha)?;
            self.write(Entity::PullRequestCommit(PullRequestCommit {
                id: ids.commit(repo_id, sha),
                ref_id: sha.clone(),
                ref_type: ids.ref_type.clone(),
                customer_id: ids.customer_id.clone(),
                repo_id: ids.repo(repo_id),
                pull_request_id: ids.pull_request(repo_id, &pr_ref),
                branch_id: ids.branch(repo_id, &branch, &shas[0]),
                sha: sha.clone(),
                message: detail.comment,
                url: detail.remote_url,
                additions: detail.change_counts.add,
                deletions: detail.change_counts.delete,
                author_ref_id: detail.push.pushed_by.id.clone(),
                committer_ref_id: detail.push.pushed_by.id,
                created_date: detail.push.date,
            }))?;
        }

        self.write(Entity::PullRequest(self.pull_request_entity(repo_id, pr, pr_ref, shas)))
    }

    fn fetch_commit(&self, repo_id: &str, sha: &str) -> Result<CommitDetailResponse, ApiError> {
        let endpoint = format!(
            "_apis/git/repositories/{}/commits/{}",
            escape(repo_id),
            escape(sha)
        );
        self.client()
            .get(&endpoint, Params::new().with("changeCount", 1))
    }

    pub fn pull_request_entity(
        &self,
        repo_id: &str,
        pr: &PullRequestResponse,
        pr_ref: String,
        commit_shas: Vec<String>,
    ) -> PullRequest {
        let ids = self.ids();
        let branch = branch_name(&pr.source_branch);

        let mut status = PullRequestStatus::Unknown;
        let mut merge_sha = None;
        let mut merged_date = None;
        match pr.status.as_str() {
            "completed" => {
                status = PullRequestStatus::Merged;
                merge_sha = pr.last_merge_commit.as_ref().map(|c| c.commit_id.clone());
                merged_date = pr.completion_queue_time;
            }
            "active" => status = PullRequestStatus::Open,
            "abandoned" => status = PullRequestStatus::Closed,
            other => tracing::debug!(status = other, "unrecognized pull request status"),
        }

        let mut closed_by = None;
        let mut merged_by = None;
        for reviewer in &pr.reviewers {
            match reviewer.vote {
                VOTE_REJECTED => closed_by = Some(reviewer.id.clone()),
                VOTE_APPROVED => {
                    closed_by.get_or_insert_with(|| reviewer.id.clone());
                    merged_by = Some(reviewer.id.clone());
                }
                _ => {}
            }
        }

        PullRequest {
            id: ids.pull_request(repo_id, &pr_ref),
            ref_id: pr_ref,
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            repo_id: ids.repo(repo_id),
            identifier: format!("#{}", pr.pull_request_id),
            title: pr.title.clone(),
            description: pr.description.clone(),
            url: pr.url.clone(),
            branch_id: commit_shas
                .first()
                .map(|first| ids.branch(repo_id, &branch, first)),
            branch_name: branch,
            status,
            draft: pr.is_draft,
            created_by_ref_id: pr.created_by.id.clone(),
            closed_by_ref_id: closed_by,
            merged_by_ref_id: merged_by,
            merge_commit_id: merge_sha.as_ref().map(|sha| ids.commit(repo_id, sha)),
            merge_sha,
            commit_ids: commit_shas.iter().map(|sha| ids.commit(repo_id, sha)).collect(),
            commit_shas,
            created_date: pr.creation_date,
            closed_date: pr.closed_date,
            merged_date,
        }
    }
}
