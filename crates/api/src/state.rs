use std::sync::Arc;

use crate::submission::SubmissionService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Submission workflow and its collaborators.
    pub submissions: Arc<SubmissionService>,
}
