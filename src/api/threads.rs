use std::sync::OnceLock;

use regex::Regex;

use super::responses::{PullRequestResponse, ThreadComment, ThreadResponse, ValueList};
use super::{project_path, Api};
use crate::http::{escape, ApiError, Params};
use crate::model::{
    Entity, PullRequestComment, PullRequestReview, PullRequestReviewRequest, ReviewState,
};
use crate::refid::stable_hash;

const TEXT_COMMENT: &str = "text";
const SYSTEM_COMMENT: &str = "system";
// identity slot holding the voter in system vote threads
const VOTER_IDENTITY: &str = "1";

fn voted() -> &'static Regex {
    static VOTED: OnceLock<Regex> = OnceLock::new();
    VOTED.get_or_init(|| Regex::new(r"(.+?)( voted )(-10|-5|0|5|10.*)").expect("vote regex"))
}

/// Review state announced by a system comment such as `Ada voted 10`.
pub(crate) fn vote_state(content: &str) -> Option<ReviewState> {
    let captures = voted().captures(content)?;
    let vote = captures.get(3)?.as_str().split_whitespace().next()?;
    ReviewState::from_vote(vote)
}

struct ThreadScope<'a> {
    repo_id: String,
    pull_request_id: String,
    pr: &'a PullRequestResponse,
}

impl Api {
    /// Writes the comments, review requests and reviews found in a pull
    /// request's discussion threads.
    pub fn write_pull_request_threads(
        &self,
        project_id: &str,
        repo_id: &str,
        pr: &PullRequestResponse,
    ) -> Result<(), ApiError> {
        let endpoint = project_path(
            project_id,
            &format!(
                "_apis/git/repositories/{}/pullRequests/{}/threads",
                escape(repo_id),
                pr.pull_request_id
            ),
        );
        let threads: ValueList<ThreadResponse> = self.client().get(&endpoint, Params::new())?;

        let pr_ref = self
            .translator()
            .pull_request_ref_id(project_id, repo_id, pr.pull_request_id)?;
        let ids = self.ids();
        let scope = ThreadScope {
            repo_id: ids.repo(repo_id),
            pull_request_id: ids.pull_request(repo_id, &pr_ref),
            pr,
        };

        for thread in threads.value.iter().filter(|t| !t.is_deleted) {
            for comment in &thread.comments {
                match comment.comment_type.as_str() {
                    TEXT_COMMENT => self.write_text_comment(&scope, thread, comment)?,
                    SYSTEM_COMMENT => self.write_vote(&scope, thread, comment)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn write_text_comment(
        &self,
        scope: &ThreadScope<'_>,
        thread: &ThreadResponse,
        comment: &ThreadComment,
    ) -> Result<(), ApiError> {
        let ids = self.ids();
        let ref_id = format!("{}_{}", thread.id, comment.id);
        self.write(Entity::PullRequestComment(PullRequestComment {
            ref_id: ref_id.clone(),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            repo_id: scope.repo_id.clone(),
            pull_request_id: scope.pull_request_id.clone(),
            body: comment.content.clone(),
            user_ref_id: comment.author.id.clone(),
            created_date: comment.published_date,
            updated_date: comment.last_updated_date,
        }))?;
        self.write(Entity::PullRequestReviewRequest(PullRequestReviewRequest {
            ref_id,
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            repo_id: scope.repo_id.clone(),
            pull_request_id: scope.pull_request_id.clone(),
            requested_reviewer_ref_id: comment.author.id.clone(),
            sender_ref_id: scope.pr.created_by.id.clone(),
            url: scope.pr.url.clone(),
            created_date: comment.published_date,
        }))
    }

    fn write_vote(
        &self,
        scope: &ThreadScope<'_>,
        thread: &ThreadResponse,
        comment: &ThreadComment,
    ) -> Result<(), ApiError> {
        let Some(state) = vote_state(&comment.content) else {
            return Ok(());
        };
        let ids = self.ids();
        let voter = thread
            .identities
            .get(VOTER_IDENTITY)
            .map(|identity| identity.id.clone())
            .unwrap_or_default();
        self.write(Entity::PullRequestReview(PullRequestReview {
            ref_id: stable_hash([
                scope.pr.pull_request_id.to_string(),
                thread.id.to_string(),
                comment.id.to_string(),
            ]),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            repo_id: scope.repo_id.clone(),
            pull_request_id: scope.pull_request_id.clone(),
            state,
            user_ref_id: voter,
            url: scope.pr.url.clone(),
            created_date: comment.published_date,
        }))
    }
}
