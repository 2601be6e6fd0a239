use tracing::info;

use crate::config::CourseConfig;
use crate::error::{AppError, ValidationError};
use crate::models::{
    AssessmentState, AssignmentDefinition, Definitions, StatusMap, normalize_definitions,
};
use crate::report::{Status, status};
use crate::repository::{Document, WorkspaceStore};
use crate::services::reports::{STATUS_PAGE_PATH, status_page};

/// Owns the assessment definitions and status documents and the status
/// page derived from them.
pub struct AssessmentRegistry {
    store: WorkspaceStore,
    prefix: String,
    definitions: Document<Definitions>,
    status: Document<StatusMap>,
}

impl AssessmentRegistry {
    pub fn new(store: WorkspaceStore, config: &CourseConfig) -> Self {
        Self {
            store,
            prefix: config.prefix.clone(),
            definitions: Document::new(config.assessment_config_path()),
            status: Document::new(config.assessment_status_path()),
        }
    }

    /// Reloads both documents. Missing documents leave the registry empty.
    pub async fn load(&mut self) -> Result<(), AppError> {
        let defs = self.definitions.reload(&self.store).await?.map(|d| d.len());
        let states = self.status.reload(&self.store).await?.map(|s| s.len());
        if let (Some(defs), Some(states)) = (defs, states) {
            info!("Loaded {} assessment definitions and {} states", defs, states);
        }
        Ok(())
    }

    pub async fn definitions(&mut self) -> Result<Definitions, AppError> {
        Ok(self
            .definitions
            .get(&self.store)
            .await?
            .cloned()
            .unwrap_or_default())
    }

    pub async fn definition(&mut self, name: &str) -> Result<AssignmentDefinition, AppError> {
        self.definitions()
            .await?
            .remove(name)
            .ok_or_else(|| ValidationError::UnknownAssessment(name.to_string()).into())
    }

    pub async fn statuses(&mut self) -> Result<StatusMap, AppError> {
        Ok(self
            .status
            .get(&self.store)
            .await?
            .cloned()
            .unwrap_or_default())
    }

    /// Current state of a defined assessment; one without a status entry
    /// is still `Unprepared`.
    pub async fn state_of(&mut self, name: &str) -> Result<AssessmentState, AppError> {
        self.definition(name).await?;
        Ok(self
            .statuses()
            .await?
            .get(name)
            .copied()
            .unwrap_or(AssessmentState::Unprepared))
    }

    /// Merges `new_defs` into the stored definitions and refreshes every
    /// status. Nothing is written when any existing `main-dir` would change.
    pub async fn replace_definitions(&mut self, new_defs: Definitions) -> Result<StatusMap, AppError> {
        let new_defs = normalize_definitions(new_defs).inspect_err(|e| {
            status(
                Status::Fail,
                format!("Assessment configuration rejected, no changes have been made: {}", e),
            );
        })?;
        let mut merged = self.definitions().await?;

        for (name, def) in &new_defs {
            if let Some(current) = merged.get(name) {
                if current.main_dir != def.main_dir {
                    status(
                        Status::Fail,
                        format!("Cannot change the main-dir of {}, no changes have been made", name),
                    );
                    return Err(ValidationError::MainDirChanged {
                        assessment: name.clone(),
                        current: current.main_dir.clone(),
                        requested: def.main_dir.clone(),
                    }
                    .into());
                }
            }
            def.deadline_utc()?;
        }

        merged.extend(new_defs);
        self.definitions.commit(&self.store, merged).await?;
        status(Status::Ok, "Assessment configuration saved");
        self.refresh_all_status().await
    }

    /// Targeted status write for one defined assessment.
    pub async fn set_status(&mut self, name: &str, state: AssessmentState) -> Result<StatusMap, AppError> {
        self.definition(name).await?;
        let mut current = self.statuses().await?;
        current.insert(name.to_string(), state);
        self.write_status(current).await?;
        status(Status::Ok, format!("Assessment {} status set to {}", name, state));
        self.statuses().await
    }

    /// Rebuilds the status map from the definitions: existing states are
    /// kept, new assessments start `Unprepared` and undefined ones are dropped.
    pub async fn refresh_all_status(&mut self) -> Result<StatusMap, AppError> {
        let defs = self.definitions().await?;
        let current = self.statuses().await?;
        let refreshed = refreshed_status(&defs, &current);
        self.write_status(refreshed).await?;
        status(Status::Ok, "All assessment states refreshed from the configuration");
        self.statuses().await
    }

    async fn write_status(&mut self, next: StatusMap) -> Result<(), AppError> {
        let page = status_page(&self.prefix, &next);
        self.status.commit(&self.store, next).await?;
        self.store.write(STATUS_PAGE_PATH, page.as_bytes()).await?;
        Ok(())
    }
}

pub fn refreshed_status(defs: &Definitions, current: &StatusMap) -> StatusMap {
    defs.keys()
        .map(|name| {
            let state = current
                .get(name)
                .copied()
                .unwrap_or(AssessmentState::Unprepared);
            (name.clone(), state)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(dir: &str) -> AssignmentDefinition {
        AssignmentDefinition {
            main_dir: dir.to_string(),
            deadline: "2024-01-01 23:59:59".to_string(),
            deadline_utc_offset: 0,
            max_group_size: 1,
        }
    }

    #[test]
    fn test_refresh_restores_key_equality() {
        let defs: Definitions = [("hw1".to_string(), def("hw1")), ("hw2".to_string(), def("hw2"))]
            .into_iter()
            .collect();
        let current: StatusMap = [
            ("hw1".to_string(), AssessmentState::Released),
            ("old".to_string(), AssessmentState::Closed),
        ]
        .into_iter()
        .collect();

        let refreshed = refreshed_status(&defs, &current);
        assert_eq!(refreshed.keys().collect::<Vec<_>>(), defs.keys().collect::<Vec<_>>());
        assert_eq!(refreshed["hw1"], AssessmentState::Released);
        assert_eq!(refreshed["hw2"], AssessmentState::Unprepared);
    }
}
