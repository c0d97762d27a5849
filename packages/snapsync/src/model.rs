//! Domain records: the user aggregate and the read-only payloads cached
//! next to it.

use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::revision::{Revision, Revisioned};

/// The aggregate root persisted to the remote service.
///
/// Nested collections are replaced or merged by stable id, never mutated in
/// place: all `with_*` methods return a new value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub revision: Revision,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl User {
    /// Empty aggregate for a known user id (never revised).
    pub fn with_id(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    pub fn with_profile(&self, profile: Profile) -> Self {
        Self {
            profile,
            ..self.clone()
        }
    }

    /// Replace the project with the same `project_id`, or append it.
    pub fn with_project(&self, project: Project) -> Self {
        let mut projects = self.projects.clone();
        match projects
            .iter_mut()
            .find(|p| p.project_id == project.project_id)
        {
            Some(existing) => *existing = project,
            None => projects.push(project),
        }
        Self {
            projects,
            ..self.clone()
        }
    }

    pub fn project(&self, project_id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.project_id == project_id)
    }
}

impl Revisioned for User {
    fn revision(&self) -> Revision {
        self.revision
    }

    fn set_revision(&mut self, revision: Revision) {
        self.revision = revision;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub project_id: String,
    pub title: String,
    /// Target job group (ROME-style code).
    pub job_group_id: String,
    pub region_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobGroup {
    pub job_group_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaborStats {
    pub count: u64,
    #[serde(default)]
    pub unemployment_days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceTip {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// Expanded advice content. The body is opaque to this layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceContent {
    pub advice_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Identifies a labor-statistics lookup: one job in one region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaborStatsKey {
    pub region_id: String,
    pub job_id: String,
}

impl LaborStatsKey {
    pub fn new(region_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            job_id: job_id.into(),
        }
    }

    /// `"{region_id}:{job_id}"`
    pub fn cache_key(&self) -> Option<CacheKey> {
        CacheKey::compose([&self.region_id, &self.job_id])
    }
}

/// Identifies one advice module of one project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdviceKey {
    pub project_id: String,
    pub advice_id: String,
}

impl AdviceKey {
    pub fn new(project_id: impl Into<String>, advice_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            advice_id: advice_id.into(),
        }
    }

    pub fn scope_key(&self) -> Option<CacheKey> {
        CacheKey::new(&self.project_id)
    }

    pub fn entry_key(&self) -> Option<CacheKey> {
        CacheKey::new(&self.advice_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(id: &str, title: &str) -> Project {
        Project {
            project_id: id.into(),
            title: title.into(),
            ..Project::default()
        }
    }

    #[test]
    fn test_with_project_replaces_by_id() {
        let user = User::with_id("u1")
            .with_project(project("p1", "Baker"))
            .with_project(project("p2", "Nurse"));

        let edited = user.with_project(project("p1", "Pastry chef"));

        assert_eq!(edited.projects.len(), 2);
        assert_eq!(edited.project("p1").unwrap().title, "Pastry chef");
        assert_eq!(edited.projects[0].project_id, "p1");
        // Original untouched
        assert_eq!(user.project("p1").unwrap().title, "Baker");
    }

    #[test]
    fn test_user_deserializes_with_missing_revision() {
        let user: User = serde_json::from_str(r#"{"userId": "u1"}"#).unwrap();
        assert_eq!(user.revision, Revision::NONE);
        assert!(user.projects.is_empty());
    }

    #[test]
    fn test_user_wire_names() {
        let user = User {
            revision: Revision::new(3),
            ..User::with_id("u1")
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["revision"], 3);
    }

    #[test]
    fn test_labor_stats_key() {
        let key = LaborStatsKey::new("75", "job1");
        assert_eq!(key.cache_key().unwrap().as_str(), "75:job1");
        assert!(LaborStatsKey::new("", "job1").cache_key().is_none());
    }

    #[test]
    fn test_advice_key_parts() {
        let key = AdviceKey::new("p1", "commute");
        assert_eq!(key.scope_key().unwrap().as_str(), "p1");
        assert_eq!(key.entry_key().unwrap().as_str(), "commute");
    }
}
