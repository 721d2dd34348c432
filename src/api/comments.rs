use super::responses::IssueCommentResponse;
use super::{project_path, Api};
use crate::http::{ApiError, Params, API_VERSION_PARAM};
use crate::model::{Entity, IssueComment};
use crate::paginate::TOP_PARAM;

const COMMENTS_PAGE_SIZE: usize = 200;
const COMMENTS_API_VERSION: &str = "5.1-preview";

impl Api {
    /// Streams the comments of one work item to the pipe. Returns how many
    /// were written.
    pub fn fetch_issue_comments(
        &self,
        project_id: &str,
        issue_id: i64,
        issue_ref_id: &str,
    ) -> Result<usize, ApiError> {
        let endpoint = project_path(project_id, &format!("_apis/wit/workItems/{issue_id}/comments"));
        let params = Params::new()
            .with(TOP_PARAM, COMMENTS_PAGE_SIZE)
            .with(API_VERSION_PARAM, COMMENTS_API_VERSION);

        let ids = self.ids();
        let project = ids.project(project_id);
        let issue = ids.issue(issue_ref_id);
        let mut written = 0;
        self.client()
            .paginate_as(&endpoint, params, |page: Vec<IssueCommentResponse>| {
                for raw in page {
                    self.write(Entity::IssueComment(IssueComment {
                        ref_id: raw.id.to_string(),
                        ref_type: ids.ref_type.clone(),
                        customer_id: ids.customer_id.clone(),
                        project_id: project.clone(),
                        issue_id: issue.clone(),
                        body: raw.text,
                        url: raw.url,
                        user_ref_id: raw.created_by.id,
                        created_date: raw.created_date,
                        updated_date: raw.modified_date,
                    }))?;
                    written += 1;
                }
                Ok(())
            })
            .map_err(|err| err.context(format!("fetching comments for work item {issue_id}")))?;
        Ok(written)
    }
}
