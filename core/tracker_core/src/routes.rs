use crate::{
    analytics::{calendar_range, compute_analytics, AnalyticsReport},
    model::{normalize_topic, parse_date, Level},
    provider::SuggestionProvider,
    store,
    suggest::{history_entry, request_follow_up, request_suggestion, SuggestionOutcome},
};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use time::{Date, OffsetDateTime};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

const TZ_OFFSET_MINUTES_MIN: i32 = -14 * 60;
const TZ_OFFSET_MINUTES_MAX: i32 = 14 * 60;
const DEFAULT_CALENDAR_DAYS: i64 = 365;
const MAX_CALENDAR_DAYS: i64 = 3660;

#[derive(Clone)]
pub struct AppState {
    pub conn: Arc<Mutex<Connection>>,
    pub provider: Arc<dyn SuggestionProvider>,
    pub owner: Arc<str>,
    pub history_window: usize,
}

#[derive(Serialize)]
struct OkResponse<T: Serialize> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

#[derive(Serialize)]
struct ErrResponse {
    ok: bool,
    error: &'static str,
}

fn bad_request(error: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrResponse { ok: false, error })).into_response()
}

fn db_error(op: &str, err: store::StoreError) -> Response {
    error!("{op} failed: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrResponse {
            ok: false,
            error: "db_error",
        }),
    )
        .into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/save_log", post(post_save_log).options(options_ok))
        .route("/load_log/:date", get(get_load_log))
        .route("/analytics_data", get(get_analytics))
        .route("/calendar", get(get_calendar))
        .route("/progress", get(get_progress))
        .route("/next_suggestion", post(post_next_suggestion).options(options_ok))
        .route("/get_suggestion", post(post_follow_up).options(options_ok))
        .route("/history/:topic", get(get_history))
        .route(
            "/rooms",
            get(get_rooms).post(post_room).options(options_ok),
        )
        .with_state(state)
        .layer(cors)
}

async fn options_ok() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct HealthInfo {
    service: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(OkResponse {
        ok: true,
        data: Some(HealthInfo {
            service: "tracker_core",
            version: env!("CARGO_PKG_VERSION"),
        }),
    })
}

fn normalize_tz_offset_minutes(v: Option<i32>) -> i32 {
    v.unwrap_or(0)
        .clamp(TZ_OFFSET_MINUTES_MIN, TZ_OFFSET_MINUTES_MAX)
}

fn tz_offset_from_minutes(minutes: i32) -> time::UtcOffset {
    time::UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
        .unwrap_or(time::UtcOffset::UTC)
}

/// Today's date as seen by a client at the given UTC offset.
fn today_for_offset(tz_offset_minutes: Option<i32>) -> Date {
    let offset = tz_offset_from_minutes(normalize_tz_offset_minutes(tz_offset_minutes));
    OffsetDateTime::now_utc().to_offset(offset).date()
}

#[derive(Deserialize)]
struct SaveLogRequest {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    completed_tasks: Option<Value>,
}

#[derive(Serialize)]
struct SaveLogResponse {
    status: &'static str,
    message: String,
}

async fn post_save_log(State(state): State<AppState>, Json(req): Json<SaveLogRequest>) -> Response {
    let Some(date) = req.date.as_deref().and_then(parse_date) else {
        return bad_request("invalid_date");
    };
    let tasks = match req.completed_tasks {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => return bad_request("invalid_tasks"),
    };

    let mut conn = state.conn.lock().await;
    match store::save_log(&mut conn, &state.owner, date, req.notes.as_deref(), &tasks) {
        Ok(appended) => {
            info!("saved log for {date} ({appended} history entries)");
            Json(SaveLogResponse {
                status: "success",
                message: format!("Log for {date} saved."),
            })
            .into_response()
        }
        Err(err) => db_error("save_log", err),
    }
}

#[derive(Serialize)]
#[serde(tag = "status")]
enum LoadLogResponse {
    #[serde(rename = "found")]
    Found {
        tasks: Map<String, Value>,
        notes: String,
    },
    #[serde(rename = "not found")]
    NotFound,
}

async fn get_load_log(State(state): State<AppState>, Path(date): Path<String>) -> Response {
    let Some(date) = parse_date(&date) else {
        return bad_request("invalid_date");
    };
    let conn = state.conn.lock().await;
    match store::load_log(&conn, &state.owner, date) {
        Ok(Some(log)) => Json(LoadLogResponse::Found {
            tasks: log.completed_tasks,
            notes: log.notes.unwrap_or_default(),
        })
        .into_response(),
        Ok(None) => Json(LoadLogResponse::NotFound).into_response(),
        Err(err) => db_error("load_log", err),
    }
}

#[derive(Deserialize)]
struct AnalyticsQuery {
    tz_offset_minutes: Option<i32>,
}

async fn get_analytics(State(state): State<AppState>, Query(q): Query<AnalyticsQuery>) -> Response {
    let records = {
        let conn = state.conn.lock().await;
        match store::fetch_logs(&conn, &state.owner) {
            Ok(v) => v,
            Err(err) => return db_error("fetch_logs", err),
        }
    };
    let summary = compute_analytics(&records, today_for_offset(q.tz_offset_minutes));
    Json(AnalyticsReport::from(summary)).into_response()
}

#[derive(Deserialize)]
struct CalendarQuery {
    start: Option<String>,
    end: Option<String>,
    tz_offset_minutes: Option<i32>,
}

async fn get_calendar(State(state): State<AppState>, Query(q): Query<CalendarQuery>) -> Response {
    let today = today_for_offset(q.tz_offset_minutes);
    let end = match q.end.as_deref() {
        Some(s) => match parse_date(s) {
            Some(d) => d,
            None => return bad_request("invalid_date"),
        },
        None => today,
    };
    let start = match q.start.as_deref() {
        Some(s) => match parse_date(s) {
            Some(d) => d,
            None => return bad_request("invalid_date"),
        },
        None => end - time::Duration::days(DEFAULT_CALENDAR_DAYS - 1),
    };
    if start > end || (end - start).whole_days() >= MAX_CALENDAR_DAYS {
        return bad_request("invalid_range");
    }

    let records = {
        let conn = state.conn.lock().await;
        match store::fetch_logs(&conn, &state.owner) {
            Ok(v) => v,
            Err(err) => return db_error("fetch_logs", err),
        }
    };
    let summary = compute_analytics(&records, today);
    Json(calendar_range(&summary, start, end)).into_response()
}

async fn get_progress(State(state): State<AppState>) -> Response {
    let conn = state.conn.lock().await;
    match store::list_logs(&conn, &state.owner) {
        Ok(logs) => Json(logs).into_response(),
        Err(err) => db_error("list_logs", err),
    }
}

#[derive(Deserialize)]
struct NextSuggestionRequest {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    level: Option<String>,
}

#[derive(Deserialize)]
struct FollowUpRequest {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    learning: Option<String>,
}

#[derive(Serialize)]
struct SuggestionResponse {
    suggestion: String,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

async fn recent_history(state: &AppState, topic: &str) -> Result<Vec<String>, Response> {
    let conn = state.conn.lock().await;
    store::fetch_recent_history(&conn, &state.owner, topic, state.history_window)
        .map_err(|err| db_error("fetch_recent_history", err))
}

/// Persist an accepted suggestion and render the outcome.
async fn finish_suggestion(
    state: &AppState,
    topic: &str,
    outcome: SuggestionOutcome,
    level: Option<Level>,
) -> Response {
    if let SuggestionOutcome::Accepted { text, attempts } = &outcome {
        info!("accepted suggestion for {topic} after {attempts} attempt(s)");
        let conn = state.conn.lock().await;
        if let Err(err) = store::append_history(&conn, &state.owner, topic, &history_entry(text, level)) {
            return db_error("append_history", err);
        }
    }
    Json(SuggestionResponse {
        suggestion: outcome.message().to_string(),
    })
    .into_response()
}

async fn post_next_suggestion(
    State(state): State<AppState>,
    Json(req): Json<NextSuggestionRequest>,
) -> Response {
    let Some(topic) = non_blank(req.topic) else {
        return bad_request("missing_topic");
    };
    let level = match non_blank(req.level) {
        None => Level::default(),
        Some(s) => match s.parse::<Level>() {
            Ok(level) => level,
            Err(()) => return bad_request("invalid_level"),
        },
    };
    let key = normalize_topic(&topic);

    // The connection is not held while waiting on the provider.
    let history = match recent_history(&state, &key).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let outcome = request_suggestion(&topic, &history, level, state.provider.as_ref()).await;
    finish_suggestion(&state, &key, outcome, Some(level)).await
}

async fn post_follow_up(State(state): State<AppState>, Json(req): Json<FollowUpRequest>) -> Response {
    let Some(topic) = non_blank(req.topic) else {
        return bad_request("missing_topic");
    };
    let Some(learning) = non_blank(req.learning) else {
        return bad_request("missing_learning");
    };
    let key = normalize_topic(&topic);

    let history = match recent_history(&state, &key).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let outcome = request_follow_up(&topic, &learning, &history, state.provider.as_ref()).await;
    finish_suggestion(&state, &key, outcome, None).await
}

#[derive(Serialize)]
struct HistoryResponse {
    completed: Vec<String>,
}

async fn get_history(State(state): State<AppState>, Path(topic): Path<String>) -> Response {
    let conn = state.conn.lock().await;
    match store::fetch_all_history(&conn, &state.owner, &topic) {
        Ok(completed) => Json(HistoryResponse { completed }).into_response(),
        Err(err) => db_error("fetch_all_history", err),
    }
}

async fn get_rooms(State(state): State<AppState>) -> Response {
    let conn = state.conn.lock().await;
    match store::list_room_progress(&conn, &state.owner) {
        Ok(rooms) => Json(OkResponse {
            ok: true,
            data: Some(rooms),
        })
        .into_response(),
        Err(err) => db_error("list_room_progress", err),
    }
}

#[derive(Deserialize)]
struct RoomUpsert {
    #[serde(default)]
    room_id: Option<String>,
    #[serde(default)]
    completed: bool,
}

async fn post_room(State(state): State<AppState>, Json(req): Json<RoomUpsert>) -> Response {
    let Some(room_id) = non_blank(req.room_id) else {
        return bad_request("missing_room");
    };
    let conn = state.conn.lock().await;
    if let Err(err) = store::set_room_progress(&conn, &state.owner, &room_id, req.completed) {
        return db_error("set_room_progress", err);
    }
    match store::list_room_progress(&conn, &state.owner) {
        Ok(rooms) => Json(OkResponse {
            ok: true,
            data: Some(rooms),
        })
        .into_response(),
        Err(err) => db_error("list_room_progress", err),
    }
}
