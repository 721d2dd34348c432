use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use super::responses::{IdentityRef, TeamResponse};
use super::Api;
use crate::http::ApiError;
use crate::model::{Entity, SourceCodeUser, WorkUser};

fn domain_prefix() -> &'static Regex {
    static DOMAIN_PREFIX: OnceLock<Regex> = OnceLock::new();
    DOMAIN_PREFIX.get_or_init(|| Regex::new(r"^(.*?)\\").expect("domain prefix regex"))
}

/// Strips a leading `DOMAIN\` from account names.
pub fn strip_domain(name: &str) -> String {
    domain_prefix().replace(name, "").into_owned()
}

/// Team members seen across every project of a run, keyed by user id.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Mutex<BTreeMap<String, IdentityRef>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: IdentityRef) {
        if user.id.is_empty() {
            return;
        }
        self.users
            .lock()
            .expect("user registry mutex poisoned")
            .insert(user.id.clone(), user);
    }

    pub fn len(&self) -> usize {
        self.users.lock().expect("user registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<IdentityRef> {
        self.users
            .lock()
            .expect("user registry mutex poisoned")
            .values()
            .cloned()
            .collect()
    }
}

impl Api {
    /// Collects the members of every team, one work unit per team.
    pub fn fetch_users(
        &self,
        project_id: &str,
        teams: &[TeamResponse],
        registry: &Arc<UserRegistry>,
    ) -> Result<(), ApiError> {
        tracing::info!(project_id, teams = teams.len(), "fetching users");
        let batch = self.batch();
        for team in teams {
            let api = self.clone();
            let registry = Arc::clone(registry);
            let project_id = project_id.to_string();
            let team_id = team.id.clone();
            batch.submit(move || {
                for member in api.fetch_team_members(&project_id, &team_id)? {
                    registry.insert(member);
                }
                Ok(())
            });
        }
        batch
            .wait()
            .map_err(|err| err.context(format!("fetching users for project {project_id}")))
    }

    pub fn work_user(&self, user: &IdentityRef) -> WorkUser {
        WorkUser {
            ref_id: user.id.clone(),
            ref_type: self.ids().ref_type.clone(),
            customer_id: self.ids().customer_id.clone(),
            name: strip_domain(&user.display_name),
            username: strip_domain(&user.unique_name),
            avatar_url: user.image_url.clone(),
            url: user.url.clone(),
            member: true,
        }
    }

    pub fn source_code_user(&self, user: &IdentityRef) -> SourceCodeUser {
        SourceCodeUser {
            ref_id: user.id.clone(),
            ref_type: self.ids().ref_type.clone(),
            customer_id: self.ids().customer_id.clone(),
            name: strip_domain(&user.display_name),
            username: strip_domain(&user.unique_name),
            avatar_url: user.image_url.clone(),
            url: user.url.clone(),
            member: true,
            human: true,
        }
    }

    /// Writes every registered user as both a work and a source-code user,
    /// the two kinds in parallel.
    pub fn write_users(&self, registry: &UserRegistry) -> Result<(), ApiError> {
        let users = Arc::new(registry.snapshot());
        tracing::info!(count = users.len(), "writing users");

        let batch = self.batch_of(2);
        {
            let api = self.clone();
            let users = Arc::clone(&users);
            batch.submit(move || {
                for user in users.iter() {
                    api.write(Entity::WorkUser(api.work_user(user)))?;
                }
                Ok(())
            });
        }
        {
            let api = self.clone();
            batch.submit(move || {
                for user in users.iter() {
                    api.write(Entity::SourceCodeUser(api.source_code_user(user)))?;
                }
                Ok(())
            });
        }
        batch.wait()
    }
}
