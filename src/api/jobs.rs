//! Job API endpoints.
//!
//! Actions are applied to the user's view immediately and then confirmed
//! (or corrected) by the store.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde_json::json;

use super::{success, ApiResult, CurrentSession, SelectionRequest};
use crate::errors::AppError;
use crate::models::{wire, CreateJobRequest, Job, JobAction};
use crate::notify;
use crate::remote::{RemoteStore, Table};
use crate::session::Session;
use crate::sync::{Mutation, Role, Selection, ViewSnapshot};
use crate::AppState;

/// GET /api/jobs - Current job view.
pub async fn list_jobs(CurrentSession(session): CurrentSession) -> ApiResult<ViewSnapshot<Job>> {
    success(session.jobs.snapshot().await)
}

/// PUT /api/jobs/selection - Switch the job tab.
pub async fn select_jobs(
    CurrentSession(session): CurrentSession,
    Json(request): Json<SelectionRequest>,
) -> ApiResult<ViewSnapshot<Job>> {
    if request.selection.job_status().is_none() && request.selection != Selection::All {
        return Err(AppError::Validation(format!(
            "'{}' is not a job tab",
            request.selection.as_str()
        )));
    }
    session.jobs.set_selection(request.selection).await?;
    success(session.jobs.snapshot().await)
}

/// POST /api/jobs - Post a new job (admins only).
pub async fn create_job(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<ViewSnapshot<Job>> {
    session.require_role(Role::Admin)?;
    request.validate()?;

    let id = uuid::Uuid::new_v4().to_string();
    let draft = Job::draft(id, session.user_id().to_string(), &request, Utc::now());
    let row = draft.to_row();

    let store = state.store.clone();
    session
        .jobs
        .mutate(Mutation::Create(draft), async move {
            store.insert(Table::Jobs, row).await.map(Some)
        })
        .await?;

    success(session.jobs.snapshot().await)
}

/// POST /api/jobs/:id/accept - Claim an open job (drivers only).
pub async fn accept_job(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Job>> {
    session.require_role(Role::Driver)?;
    let action = JobAction::Accept {
        driver_id: session.user_id().to_string(),
    };
    let accepted = run_action(&state, &session, &id, action, "accept_job").await?;

    if let Some(job) = accepted {
        push_to_admin(&state, &job, session.profile.full_name.as_deref()).await;
    }
    success(session.jobs.snapshot().await)
}

/// POST /api/jobs/:id/start - Start an assigned job (drivers only).
pub async fn start_job(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Job>> {
    session.require_role(Role::Driver)?;
    run_action(&state, &session, &id, JobAction::Start, "start_job").await?;
    success(session.jobs.snapshot().await)
}

/// POST /api/jobs/:id/complete - Complete a job in progress (drivers only).
pub async fn complete_job(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Job>> {
    session.require_role(Role::Driver)?;
    run_action(&state, &session, &id, JobAction::Complete, "complete_job").await?;
    success(session.jobs.snapshot().await)
}

/// POST /api/jobs/:id/cancel - Cancel an open or assigned job (admins only).
pub async fn cancel_job(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(id): Path<String>,
) -> ApiResult<ViewSnapshot<Job>> {
    session.require_role(Role::Admin)?;
    run_action(&state, &session, &id, JobAction::Cancel, "cancel_job").await?;
    success(session.jobs.snapshot().await)
}

/// Apply `action` to the view, then run `procedure` on the store.
async fn run_action(
    state: &AppState,
    session: &Session,
    id: &str,
    action: JobAction,
    procedure: &'static str,
) -> Result<Option<Job>, AppError> {
    let actor = match session.role() {
        Role::Driver => "driver_id",
        Role::Admin => "admin_id",
    };
    let mut params = json!({ "job_id": id });
    params[actor] = json!(session.user_id());
    let store = state.store.clone();

    session
        .jobs
        .mutate(
            Mutation::Apply {
                id: id.to_string(),
                action,
            },
            async move {
                let result = store.rpc(procedure, params).await?;
                // complete_job answers with the job and its new invoice.
                let job = result.get("job").cloned().unwrap_or(result);
                Ok::<_, AppError>(Some(job))
            },
        )
        .await
}

/// Tell the job's admin on their device that it was accepted.
async fn push_to_admin(state: &AppState, job: &Job, driver_name: Option<&str>) {
    let Some(admin_id) = job.admin_id.as_deref() else {
        return;
    };
    let token = match state.store.fetch(Table::Profiles, admin_id).await {
        Ok(Some(profile)) => wire::text(&profile, "push_token"),
        Ok(None) => None,
        Err(err) => {
            tracing::warn!("Failed to look up admin push token: {}", err);
            None
        }
    };
    let Some(token) = token else {
        return;
    };

    let driver = job
        .driver_name
        .as_deref()
        .or(driver_name)
        .unwrap_or("A driver");
    let title = job.title.clone().unwrap_or_else(|| "a job".to_string());
    notify::dispatch_remote(
        state.notifier.clone(),
        token,
        "Job accepted".to_string(),
        format!("{} accepted {}", driver, title),
    );
}
