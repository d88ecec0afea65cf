//! Placement of a variable on the surveyed panels.
//!
//! Create mode writes one new variable to the least loaded panel, moving on
//! to the next candidate when a panel refuses. Update mode rewrites existing
//! variables whose current value matches the environment's update pattern on
//! every panel.

use std::sync::Arc;

use futures::future::join_all;
use panelgate_core::selection::{rank_by_load, PanelLoad};
use panelgate_core::types::DbId;
use panelgate_panel::{EnvUpdate, NewEnv, PanelApi, PanelError};
use regex::Regex;

use super::slots::PanelSurvey;

/// A variable created on one panel.
pub struct Placement {
    pub panel_id: DbId,
    pub api: Arc<dyn PanelApi>,
    /// Ids the panel assigned to the new records.
    pub created_ids: Vec<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    #[error("No panel is available")]
    NoPanel,

    #[error("Every panel refused the variable: {0}")]
    AllFailed(PanelError),
}

/// Surveys ordered from least to most copies of `name`; ties keep survey order.
pub fn rank_for_create<'a>(name: &str, surveys: &'a [PanelSurvey]) -> Vec<&'a PanelSurvey> {
    let loads = surveys
        .iter()
        .map(|survey| PanelLoad {
            panel_id: survey.panel_id,
            matching: survey.matching(name),
        })
        .collect();

    rank_by_load(loads)
        .into_iter()
        .filter_map(|load| surveys.iter().find(|s| s.panel_id == load.panel_id))
        .collect()
}

/// Create `env` on the first candidate that accepts it.
pub async fn create_on_best_panel(
    candidates: &[&PanelSurvey],
    env: &NewEnv,
) -> Result<Placement, PlacementError> {
    let mut last_error = None;

    for survey in candidates {
        match survey.api.create_envs(std::slice::from_ref(env)).await {
            Ok(created) => {
                tracing::info!(
                    panel_id = survey.panel_id,
                    panel = %survey.panel_name,
                    name = %env.name,
                    "Variable created",
                );
                return Ok(Placement {
                    panel_id: survey.panel_id,
                    api: Arc::clone(&survey.api),
                    created_ids: created.into_iter().map(|record| record.id).collect(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    panel_id = survey.panel_id,
                    panel = %survey.panel_name,
                    error = %e,
                    "Create refused, trying next panel",
                );
                last_error = Some(e);
            }
        }
    }

    Err(last_error.map_or(PlacementError::NoPanel, PlacementError::AllFailed))
}

/// Rewrite every variable called `name` whose current value matches
/// `pattern`, across all panels.
///
/// `remarks` of `None` keeps each record's existing remarks. Returns how many
/// panels had at least one successful update.
pub async fn update_matching(
    surveys: &[PanelSurvey],
    pattern: &Regex,
    name: &str,
    value: &str,
    remarks: Option<&str>,
) -> usize {
    let per_panel = surveys.iter().map(|survey| async move {
        let mut updated = false;
        let targets = survey
            .envs
            .iter()
            .filter(|env| env.name == name && pattern.is_match(&env.value));

        for existing in targets {
            let update = EnvUpdate {
                id: existing.id,
                name: existing.name.clone(),
                value: value.to_string(),
                remarks: remarks
                    .map(str::to_string)
                    .or_else(|| existing.remarks.clone())
                    .unwrap_or_default(),
            };
            match survey.api.update_env(&update).await {
                Ok(_) => {
                    tracing::info!(panel_id = survey.panel_id, env_id = existing.id, "Variable updated");
                    updated = true;
                }
                Err(e) => tracing::warn!(
                    panel_id = survey.panel_id,
                    env_id = existing.id,
                    error = %e,
                    "Update failed",
                ),
            }
        }
        updated
    });

    join_all(per_panel).await.into_iter().filter(|updated| *updated).count()
}
