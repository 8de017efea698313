//! Route handlers

use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::join_all;
use serde::Deserialize;
use serde_json::json;

use super::responses::{created, handle_error, handle_result, no_content, ok};
use super::AppState;
use crate::errors::{AppError, AppResult};
use crate::models::{JobKey, JobList, PageRequest, RecordQuery};
use crate::services::CreateJob;

const DEFAULT_PAGE_SIZE: u32 = 10;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStateParams {
    pub page_size: Option<u32>,
    pub records: Option<bool>,
}

pub async fn get_job_state(
    State(state): State<AppState>,
    Path((site, component, job)): Path<(String, String, String)>,
    Query(params): Query<JobStateParams>,
) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }

    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let with_records = params.records.unwrap_or(false);
    match state
        .health
        .evaluate(&site, &component, &job, page_size, with_records)
        .await
    {
        Ok(Some(job_state)) => Json(job_state).into_response(),
        Ok(None) => handle_error(AppError::not_found("job", format!("{}/{}", component, job))),
        Err(e) => handle_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct JobListParams {
    pub jobdata: Option<bool>,
    pub all: Option<bool>,
    pub thresholds: Option<bool>,
}

/// Jobs of the site, or of every active site with `all=true`
pub async fn list_job_states(
    State(state): State<AppState>,
    Path(site): Path<String>,
    Query(params): Query<JobListParams>,
) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }

    let tenants: Vec<String> = if params.all.unwrap_or(false) {
        state.config.active_tenants().map(|t| t.name.clone()).collect()
    } else {
        vec![site]
    };
    let with_data = params.jobdata.unwrap_or(false);
    let thresholds_only = params.thresholds.unwrap_or(false);
    let base_url = state.config.web.base_url.as_str();

    let lists = join_all(
        tenants
            .iter()
            .map(|tenant| state.health.list_jobs(tenant, with_data, thresholds_only, base_url)),
    )
    .await;

    let mut result = JobList::default();
    for list in lists {
        match list {
            Ok(list) => result.jobs.extend(list.jobs),
            Err(e) => return handle_error(e),
        }
    }
    Json(result).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

pub async fn list_job_records(
    State(state): State<AppState>,
    Path(site): Path<String>,
    Query(mut query): Query<RecordQuery>,
    Query(paging): Query<PageParams>,
) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }

    if let (Some(after), Some(before)) = (query.started_after, query.started_before) {
        if after > before {
            return handle_error(AppError::validation(
                "startedAfter must not be later than startedBefore",
            ));
        }
    }

    query.site = site;
    let page = PageRequest::new(
        paging.page.unwrap_or(0),
        paging.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    );
    let result: AppResult<_> = state
        .database
        .query_execution_records(&query, page)
        .await
        .map_err(Into::into);
    handle_result(result)
}

pub async fn job_record_filters(State(state): State<AppState>, Path(site): Path<String>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }

    let result: AppResult<_> = state
        .database
        .distinct_record_values(&site)
        .await
        .map_err(Into::into);
    handle_result(result)
}

pub async fn list_jobs(State(state): State<AppState>, Path(site): Path<String>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    handle_result(state.lifecycle.list(&site).await.map_err(AppError::from))
}

pub async fn get_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    handle_result(state.lifecycle.status(&key).await.map_err(AppError::from))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub component: String,
    /// Registered implementation name within the component
    pub job: String,
    pub name: String,
    pub cron_expression: Option<String>,
    pub description: Option<String>,
}

pub async fn create_job(
    State(state): State<AppState>,
    Path(site): Path<String>,
    Json(request): Json<CreateJobRequest>,
) -> Response {
    let tenant = match state.tenant(&site) {
        Ok(tenant) => tenant,
        Err(e) => return handle_error(e),
    };
    if !tenant.components.contains(&request.component) {
        return handle_error(AppError::not_found("component", request.component));
    }

    let create = CreateJob {
        component: request.component,
        bean: request.job,
        name: request.name,
        cron_expression: request.cron_expression,
        description: request.description,
    };
    match state.lifecycle.create(&site, create).await {
        Ok(status) => created(status),
        Err(e) => handle_error(e.into()),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobRequest {
    pub cron_expression: String,
    pub description: Option<String>,
}

pub async fn update_job(
    State(state): State<AppState>,
    Path((site, job)): Path<(String, String)>,
    Json(request): Json<UpdateJobRequest>,
) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    handle_result(
        state
            .lifecycle
            .update(&key, &request.cron_expression, request.description)
            .await
            .map_err(AppError::from),
    )
}

pub async fn schedule_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    handle_result(state.lifecycle.schedule(&key).await.map_err(AppError::from))
}

pub async fn unschedule_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    handle_result(state.lifecycle.unschedule(&key, false).await.map_err(AppError::from))
}

pub async fn run_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    match state.lifecycle.run_once(&key).await {
        Ok(trigger) => created(trigger),
        Err(e) => handle_error(e.into()),
    }
}

pub async fn interrupt_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    match state.lifecycle.interrupt(&key).await {
        Ok(signalled) => ok(json!({ "interrupted": signalled })),
        Err(e) => handle_error(e.into()),
    }
}

pub async fn delete_job(State(state): State<AppState>, Path((site, job)): Path<(String, String)>) -> Response {
    if let Err(e) = state.tenant(&site) {
        return handle_error(e);
    }
    let key = JobKey::new(site, job);
    match state.lifecycle.delete(&key).await {
        Ok(()) => no_content(),
        Err(e) => handle_error(e.into()),
    }
}
