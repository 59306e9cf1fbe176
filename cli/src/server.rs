use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;

use crate::config::generate_token;
use planner_core::error::{TrackerError, tracker_error};
use planner_core::models::{
    DueTracker, EXPORT_VERSION, ExportData, Frequency, FrequencyFields, FrequencyKind,
    ImportSummary, NewCompletion, NewTracker, RecordedCompletion, Tracker, TrackerCalendarDay,
    TrackerCompletion, TrackerStats, UpdateTracker, parse_iso_date,
};
use planner_core::schedule;
use planner_core::service::PlannerService;

const BODY_LIMIT: usize = 10 * 1024 * 1024; // 10 MB

/// Days returned by the calendar endpoint when no `start` is given.
const DEFAULT_CALENDAR_DAYS: u64 = 28;

/// How requests are tied to a user.
#[derive(Clone, Debug)]
pub enum Auth {
    /// `Authorization: Bearer <token>` resolved through the `api_tokens` table.
    Tokens,
    /// Every request acts as `user`.
    Disabled { user: String },
}

#[derive(Clone)]
struct AppState {
    service: Arc<Mutex<PlannerService>>,
    auth: Auth,
}

impl AppState {
    fn service(&self) -> MutexGuard<'_, PlannerService> {
        self.service
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// The authenticated user, set by [`require_auth`].
#[derive(Clone, Debug)]
struct CurrentUser(String);

// --- Request / Response types ---

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct CreateTrackerRequest {
    title: String,
    description: Option<String>,
    category: Option<String>,
    icon: Option<String>,
    color: Option<String>,
    project_id: Option<String>,
    frequency: Option<String>,
    frequency_value: Option<i64>,
    target_days: Option<Vec<i64>>,
    custom_dates: Option<Vec<String>>,
    start_date: Option<String>,
    end_date: Option<String>,
    utc_offset_minutes: Option<i32>,
    is_active: Option<bool>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateTrackerRequest {
    title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    category: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    icon: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    color: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    project_id: Option<Option<String>>,
    frequency: Option<String>,
    frequency_value: Option<i64>,
    target_days: Option<Vec<i64>>,
    custom_dates: Option<Vec<String>>,
    start_date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    end_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    utc_offset_minutes: Option<Option<i32>>,
    is_active: Option<bool>,
}

/// Fields are optional here so a missing one is reported as 400, not 422.
#[derive(Deserialize)]
struct CreateCompletionRequest {
    tracker_id: Option<String>,
    completion_date: Option<String>,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct ListTrackersQuery {
    active: Option<bool>,
}

#[derive(Deserialize)]
struct StatsQuery {
    as_of: Option<String>,
}

#[derive(Deserialize)]
struct RangeQuery {
    start: Option<String>,
    end: Option<String>,
}

#[derive(Deserialize)]
struct DueQuery {
    date: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct SettingsBody {
    utc_offset_minutes: Option<i32>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let message = err.to_string();
        match err {
            TrackerError::InvalidConfig(_) | TrackerError::OutOfRange(_) => {
                Self::BadRequest(message)
            }
            TrackerError::NotFound { .. } => Self::NotFound(message),
            TrackerError::Unauthorized => Self::Unauthorized(message),
            TrackerError::Forbidden => Self::Forbidden(message),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match tracker_error(&err) {
            Some(kind) => kind.clone().into(),
            None => Self::Internal(err),
        }
    }
}

fn parse_opt_date(s: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    Ok(s.map(parse_iso_date).transpose()?)
}

fn parse_frequency(
    kind: &str,
    frequency_value: Option<i64>,
    target_days: Option<Vec<i64>>,
    custom_dates: Option<Vec<String>>,
) -> Result<Frequency, ApiError> {
    let custom_dates = custom_dates
        .map(|dates| {
            dates
                .iter()
                .map(|d| parse_iso_date(d))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;
    let fields = FrequencyFields {
        frequency: FrequencyKind::parse(kind)?,
        frequency_value,
        target_days,
        custom_dates,
    };
    Ok(Frequency::from_fields(&fields)?)
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let user = match &state.auth {
        Auth::Disabled { user } => user.clone(),
        Auth::Tokens => {
            let token = request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string);
            let resolved = match token {
                Some(token) => state.service().authenticate(&token),
                None => Err(TrackerError::Unauthorized.into()),
            };
            match resolved {
                Ok(user) => user,
                Err(e) if tracker_error(&e) == Some(&TrackerError::Unauthorized) => {
                    return ApiError::Unauthorized("Invalid or missing API key".to_string())
                        .into_response();
                }
                Err(e) => return ApiError::Internal(e).into_response(),
            }
        }
    };
    request.extensions_mut().insert(CurrentUser(user));
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    tracing::debug!(%method, %path, status = response.status().as_u16(), "request");
    response
}

// --- Tracker handlers ---

async fn list_trackers(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ListTrackersQuery>,
) -> Result<Json<Vec<Tracker>>, ApiError> {
    let trackers = state.service().list_trackers(&user, query.active)?;
    Ok(Json(trackers))
}

async fn create_tracker(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<CreateTrackerRequest>,
) -> Result<(StatusCode, Json<Tracker>), ApiError> {
    let frequency = parse_frequency(
        req.frequency.as_deref().unwrap_or("daily"),
        req.frequency_value,
        req.target_days,
        req.custom_dates,
    )?;
    let end_date = parse_opt_date(req.end_date.as_deref())?;

    let svc = state.service();
    let start_date = match parse_opt_date(req.start_date.as_deref())? {
        Some(d) => d,
        None => svc.today(&user)?,
    };
    let tracker = svc.create_tracker(
        &user,
        &NewTracker {
            project_id: req.project_id,
            title: req.title,
            description: req.description,
            category: req.category,
            icon: req.icon,
            color: req.color,
            frequency,
            start_date,
            end_date,
            utc_offset_minutes: req.utc_offset_minutes,
            is_active: req.is_active.unwrap_or(true),
        },
    )?;
    Ok((StatusCode::CREATED, Json(tracker)))
}

async fn get_tracker(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Tracker>, ApiError> {
    let tracker = state.service().get_tracker(&user, &id)?;
    Ok(Json(tracker))
}

async fn update_tracker(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(req): Json<UpdateTrackerRequest>,
) -> Result<Json<Tracker>, ApiError> {
    let frequency = match req.frequency.as_deref() {
        Some(kind) => Some(parse_frequency(
            kind,
            req.frequency_value,
            req.target_days,
            req.custom_dates,
        )?),
        None if req.frequency_value.is_some()
            || req.target_days.is_some()
            || req.custom_dates.is_some() =>
        {
            return Err(ApiError::BadRequest(
                "frequency is required when changing frequency_value, target_days or custom_dates"
                    .to_string(),
            ));
        }
        None => None,
    };
    let end_date = match req.end_date {
        Some(end) => Some(parse_opt_date(end.as_deref())?),
        None => None,
    };

    let update = UpdateTracker {
        title: req.title,
        description: req.description,
        category: req.category,
        icon: req.icon,
        color: req.color,
        project_id: req.project_id,
        frequency,
        start_date: parse_opt_date(req.start_date.as_deref())?,
        end_date,
        utc_offset_minutes: req.utc_offset_minutes,
        is_active: req.is_active,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".to_string()));
    }

    let tracker = state.service().update_tracker(&user, &id, &update)?;
    Ok(Json(tracker))
}

async fn delete_tracker(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.service().delete_tracker(&user, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh_tracker(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<TrackerStats>, ApiError> {
    let stats = state.service().refresh_tracker(&user, &id)?;
    Ok(Json(stats))
}

async fn get_tracker_stats(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<TrackerStats>, ApiError> {
    let as_of = parse_opt_date(query.as_of.as_deref())?;
    let stats = state.service().tracker_stats(&user, &id, as_of)?;
    Ok(Json(stats))
}

async fn get_tracker_calendar(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<TrackerCalendarDay>>, ApiError> {
    let start = parse_opt_date(query.start.as_deref())?;
    let end = parse_opt_date(query.end.as_deref())?;

    let svc = state.service();
    let end = match end {
        Some(d) => d,
        None => {
            let tracker = svc.get_tracker(&user, &id)?;
            svc.today_for(&tracker)?
        }
    };
    let start = match start {
        Some(d) => d,
        None => schedule::window_start(end, DEFAULT_CALENDAR_DAYS)?,
    };
    let days = svc.tracker_calendar(&user, &id, start, end)?;
    Ok(Json(days))
}

async fn list_tracker_completions(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<TrackerCompletion>>, ApiError> {
    let start = parse_opt_date(query.start.as_deref())?;
    let end = parse_opt_date(query.end.as_deref())?;
    let completions = state.service().list_completions(&user, &id, start, end)?;
    Ok(Json(completions))
}

// --- Completion handlers ---

async fn create_completion(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<CreateCompletionRequest>,
) -> Result<(StatusCode, Json<RecordedCompletion>), ApiError> {
    let Some(tracker_id) = req.tracker_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError::BadRequest("tracker_id is required".to_string()));
    };
    let Some(date) = req.completion_date else {
        return Err(ApiError::BadRequest(
            "completion_date is required".to_string(),
        ));
    };
    let completion_date = parse_iso_date(&date)?;

    let recorded = state.service().record_completion(
        &user,
        &NewCompletion {
            tracker_id,
            completion_date,
            notes: req.notes,
        },
    )?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn delete_completion(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<TrackerStats>, ApiError> {
    let stats = state.service().delete_completion(&user, &id)?;
    Ok(Json(stats))
}

// --- Due list / settings ---

async fn list_due(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<DueQuery>,
) -> Result<Json<Vec<DueTracker>>, ApiError> {
    let date = parse_opt_date(query.date.as_deref())?;
    let due = state.service().due_trackers(&user, date)?;
    Ok(Json(due))
}

async fn get_settings(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<SettingsBody>, ApiError> {
    let utc_offset_minutes = state.service().default_utc_offset(&user)?;
    Ok(Json(SettingsBody { utc_offset_minutes }))
}

async fn put_settings(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<SettingsBody>, ApiError> {
    state
        .service()
        .set_default_utc_offset(&user, body.utc_offset_minutes)?;
    Ok(Json(body))
}

// --- Export / Import handlers ---

async fn export_data(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ExportData>, ApiError> {
    let data = state.service().export(&user)?;
    Ok(Json(data))
}

async fn import_data(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(data): Json<ExportData>,
) -> Result<Json<ImportSummary>, ApiError> {
    if data.version > EXPORT_VERSION {
        return Err(ApiError::BadRequest(format!(
            "Unsupported export version {} (this server reads up to {EXPORT_VERSION})",
            data.version
        )));
    }
    let summary = state.service().import(&user, &data)?;
    Ok(Json(summary))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/trackers", get(list_trackers).post(create_tracker))
        .route(
            "/api/trackers/{id}",
            get(get_tracker).put(update_tracker).delete(delete_tracker),
        )
        .route("/api/trackers/{id}/stats", get(get_tracker_stats))
        .route("/api/trackers/{id}/calendar", get(get_tracker_calendar))
        .route(
            "/api/trackers/{id}/completions",
            get(list_tracker_completions),
        )
        .route("/api/trackers/{id}/refresh", post(refresh_tracker))
        .route("/api/completions", post(create_completion))
        .route("/api/completions/{id}", delete(delete_completion))
        .route("/api/due", get(list_due))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/export", get(export_data))
        .route("/api/import", post(import_data))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

// --- Server startup ---

/// Make sure `user` has at least one API token, creating and printing one
/// on first run.
pub fn ensure_token(svc: &PlannerService, user: &str) -> anyhow::Result<()> {
    if !svc.list_api_tokens(user)?.is_empty() {
        return Ok(());
    }
    let token = generate_token();
    svc.create_api_token(user, Some("serve"), &token)?;
    eprintln!("Generated new API token for {user}: {token}");
    eprintln!("Include in requests: Authorization: Bearer {token}");
    Ok(())
}

pub async fn start_server(
    service: PlannerService,
    port: u16,
    bind: &str,
    auth: Auth,
) -> anyhow::Result<()> {
    match &auth {
        Auth::Tokens => {
            tracing::info!("token authentication enabled (manage with `planner token`)");
        }
        Auth::Disabled { user } => {
            tracing::warn!(user = %user, "authentication disabled (--no-auth), API is open to anyone");
            if bind != "127.0.0.1" && bind != "localhost" {
                tracing::warn!(
                    bind,
                    "listening with no authentication; any device on your network can access this API"
                );
            }
        }
    }

    let state = AppState {
        service: Arc::new(Mutex::new(service)),
        auth,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::BodyExt;
    use planner_core::service::Clock;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token-abc123456789";

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn test_state(auth: Auth) -> AppState {
        let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap());
        let service = PlannerService::new_in_memory().unwrap().with_clock(clock);
        service.create_api_token("alice", Some("test"), TOKEN).unwrap();
        AppState {
            service: Arc::new(Mutex::new(service)),
            auth,
        }
    }

    fn test_app(auth: Auth) -> Router {
        build_router(test_state(auth))
    }

    fn no_auth() -> Auth {
        Auth::Disabled {
            user: "alice".to_string(),
        }
    }

    fn json_request(method: &str, uri: &str, body: &serde_json::Value) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    async fn create_daily(app: &Router, title: &str) -> String {
        let (status, json) = send(
            app,
            json_request(
                "POST",
                "/api/trackers",
                &serde_json::json!({
                    "title": title,
                    "frequency": "daily",
                    "start_date": "2024-01-01",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app(Auth::Tokens);

        let response = app.oneshot(get_request("/api/trackers")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_wrong_key_returns_401() {
        let app = test_app(Auth::Tokens);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/trackers")
                    .header("Authorization", "Bearer wrong-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_correct_key_succeeds() {
        let state = test_state(Auth::Tokens);
        state
            .service()
            .create_tracker(
                "alice",
                &NewTracker::daily("Run", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();
        state
            .service()
            .create_tracker(
                "bob",
                &NewTracker::daily("Swim", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();
        let app = build_router(state);

        let (status, json) = send(
            &app,
            axum::http::Request::get("/api/trackers")
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let trackers = json.as_array().unwrap();
        assert_eq!(trackers.len(), 1);
        assert_eq!(trackers[0]["title"], "Run");
    }

    #[tokio::test]
    async fn no_auth_mode_allows_requests() {
        let app = test_app(no_auth());

        let response = app.oneshot(get_request("/api/trackers")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app(no_auth());

        let response = app.oneshot(get_request("/api/trackers")).await.unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app(Auth::Tokens);

        let response = app.oneshot(get_request("/api/trackers")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(no_auth());

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/import")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/.planner/db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }

    #[test]
    fn tracker_errors_map_to_status_codes() {
        let cases = [
            (TrackerError::invalid("bad"), StatusCode::BAD_REQUEST),
            (
                TrackerError::OutOfRange("too far".into()),
                StatusCode::BAD_REQUEST,
            ),
            (TrackerError::tracker_not_found("x"), StatusCode::NOT_FOUND),
            (TrackerError::Forbidden, StatusCode::FORBIDDEN),
            (TrackerError::Unauthorized, StatusCode::UNAUTHORIZED),
        ];
        for (err, expected) in cases {
            let api: ApiError = anyhow::Error::from(err).into();
            assert_eq!(api.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn create_tracker_validates_schedule() {
        let app = test_app(no_auth());

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/trackers",
                &serde_json::json!({
                    "title": "Gym",
                    "frequency": "weekly",
                    "target_days": [1, 3, 5],
                    "start_date": "2024-01-01",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["frequency"], "weekly");
        assert_eq!(json["target_days"], serde_json::json!([1, 3, 5]));

        for bad in [
            serde_json::json!({ "title": "X", "frequency": "every_x_days", "frequency_value": 0 }),
            serde_json::json!({ "title": "X", "frequency": "weekly", "target_days": [7] }),
            serde_json::json!({ "title": "X", "frequency": "fortnightly" }),
            serde_json::json!({ "title": "  ", "frequency": "daily" }),
            serde_json::json!({
                "title": "X",
                "start_date": "2024-02-01",
                "end_date": "2024-01-01",
            }),
        ] {
            let (status, json) = send(&app, json_request("POST", "/api/trackers", &bad)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
            assert!(json["error"].as_str().is_some());
        }
    }

    #[tokio::test]
    async fn record_completion_returns_refreshed_stats() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Meditate").await;

        for date in ["2024-01-08", "2024-01-09", "2024-01-09"] {
            let (status, json) = send(
                &app,
                json_request(
                    "POST",
                    "/api/completions",
                    &serde_json::json!({ "tracker_id": id, "completion_date": date }),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(json["completion"]["completion_date"], date);
        }

        let (status, tracker) = send(&app, get_request(&format!("/api/trackers/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        // duplicate date does not double count; today (01-10) is still pending
        assert_eq!(tracker["total_completions"], 2);
        assert_eq!(tracker["current_streak"], 2);

        let (status, stats) = send(
            &app,
            get_request(&format!("/api/trackers/{id}/stats?as_of=2024-01-09")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["current_streak"], 2);
        assert_eq!(stats["best_streak"], 2);
        assert_eq!(stats["last_completion_date"], "2024-01-09");
    }

    #[tokio::test]
    async fn record_completion_missing_fields_returns_400() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Meditate").await;

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({ "completion_date": "2024-01-02" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "tracker_id is required");

        let (status, json) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({ "tracker_id": id }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "completion_date is required");

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({ "tracker_id": id, "completion_date": "01/02/2024" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_tracker_returns_404() {
        let app = test_app(no_auth());

        let (status, _) = send(&app, get_request("/api/trackers/does-not-exist")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({
                    "tracker_id": "does-not-exist",
                    "completion_date": "2024-01-02",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_users_tracker_returns_403() {
        let state = test_state(no_auth());
        let bobs = state
            .service()
            .create_tracker(
                "bob",
                &NewTracker::daily("Swim", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
            )
            .unwrap();
        let app = build_router(state);

        let (status, json) = send(&app, get_request(&format!("/api/trackers/{}", bobs.id))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"], "Tracker belongs to another user");

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({ "tracker_id": bobs.id, "completion_date": "2024-01-02" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            axum::http::Request::delete(format!("/api/trackers/{}", bobs.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn update_tracker_changes_schedule_and_clears_end_date() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Read").await;

        let (status, json) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/trackers/{id}"),
                &serde_json::json!({
                    "frequency": "every_x_days",
                    "frequency_value": 3,
                    "end_date": "2024-03-01",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["frequency"], "every_x_days");
        assert_eq!(json["frequency_value"], 3);
        assert_eq!(json["end_date"], "2024-03-01");

        let (status, json) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/trackers/{id}"),
                &serde_json::json!({ "end_date": null }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["end_date"].is_null());
        assert_eq!(json["frequency_value"], 3);

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                &format!("/api/trackers/{id}"),
                &serde_json::json!({ "frequency_value": 2 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            json_request("PUT", &format!("/api/trackers/{id}"), &serde_json::json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn calendar_and_completion_listing() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Stretch").await;
        send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({
                    "tracker_id": id,
                    "completion_date": "2024-01-02",
                    "notes": "hamstrings",
                }),
            ),
        )
        .await;

        let (status, days) = send(
            &app,
            get_request(&format!(
                "/api/trackers/{id}/calendar?start=2023-12-31&end=2024-01-03"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let days = days.as_array().unwrap();
        assert_eq!(days.len(), 4);
        assert_eq!(days[0]["is_scheduled"], false);
        assert_eq!(days[2]["is_completed"], true);
        assert_eq!(days[2]["completion"]["notes"], "hamstrings");
        assert_eq!(days[3]["is_completed"], false);

        let (status, _) = send(
            &app,
            get_request(&format!(
                "/api/trackers/{id}/calendar?start=2024-01-01&end=2025-06-01"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, completions) = send(
            &app,
            get_request(&format!(
                "/api/trackers/{id}/completions?start=2024-01-01&end=2024-01-31"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(completions.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn calendar_default_window_before_first_date_returns_400() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Stretch").await;

        let (status, json) = send(
            &app,
            get_request(&format!(
                "/api/trackers/{id}/calendar?end={}",
                NaiveDate::MIN
            )),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("out of range"));

        let (status, days) = send(&app, get_request(&format!("/api/trackers/{id}/calendar"))).await;
        assert_eq!(status, StatusCode::OK);
        let days = days.as_array().unwrap();
        assert_eq!(days.len(), 28);
        assert_eq!(days[0]["date"], "2023-12-14");
        assert_eq!(days[27]["date"], "2024-01-10");
    }

    #[tokio::test]
    async fn delete_completion_refreshes_aggregates() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Walk").await;
        let (_, recorded) = send(
            &app,
            json_request(
                "POST",
                "/api/completions",
                &serde_json::json!({ "tracker_id": id, "completion_date": "2024-01-09" }),
            ),
        )
        .await;
        let completion_id = recorded["completion"]["id"].as_str().unwrap().to_string();

        let (status, stats) = send(
            &app,
            axum::http::Request::delete(format!("/api/completions/{completion_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_completions"], 0);
        assert_eq!(stats["current_streak"], 0);

        let (status, _) = send(
            &app,
            axum::http::Request::delete(format!("/api/completions/{completion_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn due_defaults_to_today() {
        let app = test_app(no_auth());
        let id = create_daily(&app, "Vitamins").await;
        send(
            &app,
            json_request(
                "POST",
                "/api/trackers",
                &serde_json::json!({
                    "title": "Laundry",
                    "frequency": "weekly",
                    "target_days": [0],
                    "start_date": "2024-01-01",
                }),
            ),
        )
        .await;

        // the fixed clock reads Wednesday 2024-01-10
        let (status, due) = send(&app, get_request("/api/due")).await;
        assert_eq!(status, StatusCode::OK);
        let due = due.as_array().unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0]["tracker"]["id"], id.as_str());
        assert_eq!(due[0]["date"], "2024-01-10");
        assert_eq!(due[0]["is_completed"], false);

        let (_, sunday) = send(&app, get_request("/api/due?date=2024-01-14")).await;
        assert_eq!(sunday.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let app = test_app(no_auth());

        let (status, json) = send(
            &app,
            json_request(
                "PUT",
                "/api/settings",
                &serde_json::json!({ "utc_offset_minutes": -300 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["utc_offset_minutes"], -300);

        let (_, json) = send(&app, get_request("/api/settings")).await;
        assert_eq!(json["utc_offset_minutes"], -300);

        let (status, _) = send(
            &app,
            json_request(
                "PUT",
                "/api/settings",
                &serde_json::json!({ "utc_offset_minutes": 5000 }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn export_then_import_rejects_newer_version() {
        let app = test_app(no_auth());
        create_daily(&app, "Journal").await;

        let (status, mut export) = send(&app, get_request("/api/export")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(export["trackers"].as_array().unwrap().len(), 1);

        let (status, summary) = send(&app, json_request("POST", "/api/import", &export)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["trackers_imported"], 1);

        export["version"] = serde_json::json!(EXPORT_VERSION + 1);
        let (status, _) = send(&app, json_request("POST", "/api/import", &export)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
