use super::responses::ProjectResponse;
use super::Api;
use crate::http::{ApiError, Params};
use crate::model::{Entity, Project, ProjectCapability};
use crate::paginate::TOP_PARAM;

const WELL_FORMED: &str = "wellFormed";

impl Api {
    pub fn fetch_projects(&self) -> Result<Vec<ProjectResponse>, ApiError> {
        tracing::info!("fetching projects");
        let params = Params::new()
            .with("stateFilter", "all")
            .with(TOP_PARAM, self.page_size());
        self.client()
            .paginate_all("_apis/projects", params)
            .map_err(|err| err.context("fetching projects"))
    }

    pub fn project_entity(&self, project: &ProjectResponse) -> Project {
        let ids = self.ids();
        Project {
            id: ids.project(&project.id),
            ref_id: project.id.clone(),
            ref_type: ids.ref_type.clone(),
            customer_id: ids.customer_id.clone(),
            name: project.name.clone(),
            identifier: project.name.clone(),
            description: project.description.clone(),
            url: project.url.clone(),
            active: project.state == WELL_FORMED,
        }
    }

    /// Writes the project record and its capability record.
    pub fn write_project(&self, project: &ProjectResponse) -> Result<(), ApiError> {
        self.write(Entity::ProjectCapability(ProjectCapability::for_project(
            self.ids(),
            &project.id,
        )))?;
        self.write(Entity::Project(self.project_entity(project)))
    }
}
