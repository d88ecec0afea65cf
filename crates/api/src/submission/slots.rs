//! Live capacity query across an environment's panels.
//!
//! Each submission surveys its panels once. The survey feeds both the
//! capacity check and panel selection, so a panel is listed a single time
//! per submission.

use std::sync::Arc;

use futures::future::join_all;
use panelgate_core::slots::{count_named, SlotSummary};
use panelgate_core::types::DbId;
use panelgate_db::models::environment::Environment;
use panelgate_db::models::panel::Panel;
use panelgate_panel::{with_retry, PanelApi, PanelConnector, PanelEnv, PanelTarget, RetryPolicy};

/// Variables currently held by one reachable panel.
pub struct PanelSurvey {
    pub panel_id: DbId,
    pub panel_name: String,
    pub api: Arc<dyn PanelApi>,
    pub envs: Vec<PanelEnv>,
}

impl PanelSurvey {
    /// Number of variables on this panel called `name`.
    pub fn matching(&self, name: &str) -> usize {
        count_named(self.envs.iter().map(|env| env.name.as_str()), name)
    }
}

/// Connection details the panel manager needs for `panel`.
pub fn panel_target(panel: &Panel) -> PanelTarget {
    PanelTarget {
        id: panel.id,
        name: panel.name.clone(),
        url: panel.url.clone(),
        token: panel.token.clone(),
        token_expires_at: panel.token_expires_at,
    }
}

/// List variables on every panel concurrently.
///
/// Listing is retried under `retry`. A panel that still fails is logged and
/// left out, so it neither counts toward usage nor receives the variable.
pub async fn survey_panels(
    connector: &dyn PanelConnector,
    retry: RetryPolicy,
    panels: &[Panel],
) -> Vec<PanelSurvey> {
    let surveys = panels.iter().map(|panel| async move {
        let api = connector.connect(&panel_target(panel)).await;
        match with_retry(retry, "list panel variables", || api.list_envs()).await {
            Ok(envs) => Some(PanelSurvey {
                panel_id: panel.id,
                panel_name: panel.name.clone(),
                api,
                envs,
            }),
            Err(e) => {
                tracing::warn!(
                    panel_id = panel.id,
                    panel = %panel.name,
                    error = %e,
                    "Panel unreachable, skipping",
                );
                None
            }
        }
    });

    join_all(surveys).await.into_iter().flatten().collect()
}

/// Capacity of `env` given what the surveyed panels hold.
pub fn slot_summary(env: &Environment, surveys: &[PanelSurvey]) -> SlotSummary {
    SlotSummary::from_panel_counts(
        i64::from(env.quantity),
        surveys.iter().map(|survey| survey.matching(&env.name)),
    )
}
