use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{ErrorResponse, TabulaError};
use crate::store::IssueStore;
use crate::types::{
    Issue, IssueFilter, IssueUpdate, NewIssue, lenient_id, non_empty, parse_flag,
    timestamp,
};

pub type AppState = Arc<Mutex<Box<dyn IssueStore>>>;

pub struct AppError(TabulaError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TabulaError::NotFound(_) => StatusCode::NOT_FOUND,
            TabulaError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TabulaError::Internal(_) => {
                tracing::error!("{}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorResponse::from(&self.0);
        (status, Json(body)).into_response()
    }
}

impl From<TabulaError> for AppError {
    fn from(err: TabulaError) -> Self {
        AppError(err)
    }
}

fn lock(state: &AppState) -> Result<MutexGuard<'_, Box<dyn IssueStore>>, AppError> {
    state
        .lock()
        .map_err(|_| AppError(TabulaError::Internal("store lock poisoned".into())))
}

/// Request body accepted either as JSON or as an urlencoded form. An empty
/// body reads as an empty object.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| bad_body(e.body_text()))?;
            return Ok(Payload(value));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| bad_body(e.body_text()))?;
        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(serde_json::Value::Object(Default::default()))
        } else {
            serde_json::from_slice(&bytes)
        }
        .map_err(|e| bad_body(e.to_string()))?;
        Ok(Payload(value))
    }
}

fn bad_body(detail: String) -> AppError {
    AppError(TabulaError::BadRequest(format!(
        "invalid request body: {detail}"
    )))
}

#[derive(Serialize)]
struct ResultResponse {
    result: &'static str,
    #[serde(rename = "_id")]
    id: String,
}

fn logical_error(error: &str) -> Response {
    Json(ErrorResponse::new(error)).into_response()
}

fn logical_error_for(error: &str, id: String) -> Response {
    Json(ErrorResponse::with_id(error, id)).into_response()
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/issues/{project}",
            get(list_issues)
                .post(create_issue)
                .put(update_issue)
                .delete(delete_issue),
        )
        .route("/health", get(health))
        .with_state(state)
}

/// Serves the API until SIGINT/SIGTERM, then closes the store.
pub async fn start(config: &Config, store: Box<dyn IssueStore>) -> Result<(), TabulaError> {
    let state: AppState = Arc::new(Mutex::new(store));
    let app = router(state.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TabulaError::Internal(format!("failed to bind {addr}: {e}")))?;

    tracing::info!("tabula listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TabulaError::Internal(format!("server error: {e}")))?;

    close_store(state)
}

fn close_store(state: AppState) -> Result<(), TabulaError> {
    let Ok(mutex) = Arc::try_unwrap(state) else {
        tracing::warn!("store still in use at shutdown, dropping without close");
        return Ok(());
    };
    let store = mutex
        .into_inner()
        .map_err(|_| TabulaError::Internal("store lock poisoned".into()))?;
    store.close()?;
    tracing::info!("store closed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl+c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// --- Issue endpoints ---

#[derive(Deserialize)]
struct ListQuery {
    #[serde(rename = "_id")]
    id: Option<String>,
    issue_title: Option<String>,
    issue_text: Option<String>,
    created_by: Option<String>,
    assigned_to: Option<String>,
    status_text: Option<String>,
    open: Option<String>,
    created_on: Option<String>,
    updated_on: Option<String>,
}

fn invalid_filter(field: &str) -> TabulaError {
    TabulaError::BadRequest(format!("invalid filter value for {field}"))
}

fn timestamp_filter(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, TabulaError> {
    value
        .filter(|s| !s.is_empty())
        .map(|s| timestamp::parse(&s).map_err(|_| invalid_filter(field)))
        .transpose()
}

impl TryFrom<ListQuery> for IssueFilter {
    type Error = TabulaError;

    fn try_from(query: ListQuery) -> Result<Self, Self::Error> {
        let open = query
            .open
            .filter(|s| !s.is_empty())
            .map(|s| parse_flag(&s).map_err(|_| invalid_filter("open")))
            .transpose()?;

        Ok(IssueFilter {
            id: query.id,
            issue_title: query.issue_title,
            issue_text: query.issue_text,
            created_by: query.created_by,
            assigned_to: query.assigned_to,
            status_text: query.status_text,
            open,
            created_on: timestamp_filter("created_on", query.created_on)?,
            updated_on: timestamp_filter("updated_on", query.updated_on)?,
        })
    }
}

async fn list_issues(
    State(store): State<AppState>,
    Path(project): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Issue>>, AppError> {
    let Query(query) = query.map_err(|e| {
        TabulaError::BadRequest(format!("invalid filter: {}", e.body_text()))
    })?;
    let filter = IssueFilter::try_from(query)?;

    let store = lock(&store)?;
    let issues = store.find_by_filter(&project, &filter)?;
    tracing::debug!(project, count = issues.len(), "listed issues");
    Ok(Json(issues))
}

#[derive(Deserialize)]
struct CreateIssueBody {
    #[serde(default, deserialize_with = "non_empty")]
    issue_title: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    issue_text: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    created_by: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    assigned_to: Option<String>,
    #[serde(default, deserialize_with = "non_empty")]
    status_text: Option<String>,
}

async fn create_issue(
    State(store): State<AppState>,
    Path(project): Path<String>,
    Payload(body): Payload<CreateIssueBody>,
) -> Result<Response, AppError> {
    let (Some(issue_title), Some(issue_text), Some(created_by)) =
        (body.issue_title, body.issue_text, body.created_by)
    else {
        return Ok(logical_error("required field(s) missing"));
    };

    let new = NewIssue {
        project,
        issue_title,
        issue_text,
        created_by,
        assigned_to: body.assigned_to.unwrap_or_default(),
        status_text: body.status_text.unwrap_or_default(),
    };

    let store = lock(&store)?;
    let issue = store.insert(new)?;
    tracing::info!(id = %issue.id, project = %issue.project, "created issue");
    Ok(Json(issue).into_response())
}

#[derive(Deserialize)]
struct UpdateIssueBody {
    #[serde(rename = "_id", default, deserialize_with = "lenient_id")]
    id: Option<String>,
    #[serde(flatten)]
    fields: IssueUpdate,
}

async fn update_issue(
    State(store): State<AppState>,
    Payload(body): Payload<UpdateIssueBody>,
) -> Result<Response, AppError> {
    let Some(id) = body.id else {
        return Ok(logical_error("missing _id"));
    };
    if body.fields.is_empty() {
        return Ok(logical_error_for("no update field(s) sent", id));
    }

    let store = lock(&store)?;
    match store.update_by_id(&id, &body.fields) {
        Ok(issue) => {
            tracing::info!(id = %issue.id, "updated issue");
            Ok(Json(ResultResponse {
                result: "successfully updated",
                id,
            })
            .into_response())
        }
        Err(err) => {
            log_store_miss(&err);
            Ok(logical_error_for("could not update", id))
        }
    }
}

#[derive(Deserialize)]
struct DeleteIssueBody {
    #[serde(rename = "_id", default, deserialize_with = "lenient_id")]
    id: Option<String>,
}

async fn delete_issue(
    State(store): State<AppState>,
    Payload(body): Payload<DeleteIssueBody>,
) -> Result<Response, AppError> {
    let Some(id) = body.id else {
        return Ok(logical_error("missing _id"));
    };

    let store = lock(&store)?;
    match store.delete_by_id(&id) {
        Ok(()) => {
            tracing::info!(id, "deleted issue");
            Ok(Json(ResultResponse {
                result: "successfully deleted",
                id,
            })
            .into_response())
        }
        Err(err) => {
            log_store_miss(&err);
            Ok(logical_error_for("could not delete", id))
        }
    }
}

// Update and delete report every store failure in-band; only real faults
// are worth an error line.
fn log_store_miss(err: &TabulaError) {
    match err {
        TabulaError::Internal(_) => tracing::error!("{err}"),
        _ => tracing::debug!("{err}"),
    }
}
