use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::AppConfig;
use crate::error::HistoryError;
use crate::jobs::JobManager;
use crate::models::{ApiResponse, Identity, Job, JobStatus, LeagueRef, ReportRequest, Source};
use crate::services::HttpPlatformFactory;

pub const SLEEPER_USERNAME_HEADER: &str = "x-sleeper-username";

#[derive(Clone)]
pub struct AppState {
    pub jobs: JobManager,
}

pub async fn serve(port: u16, config: AppConfig) -> anyhow::Result<()> {
    let factory = Arc::new(HttpPlatformFactory::new(config.platform.clone()));
    let state = AppState {
        jobs: JobManager::new(config.jobs.clone(), factory),
    };

    let app = create_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("League history API listening on port {}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/leagues", get(list_leagues_handler))
        .route("/api/report/generate", post(generate_report_handler))
        .route("/api/report/status/{job_id}", get(report_status_handler))
        .route("/api/report/download/{job_id}", get(download_report_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// `HistoryError` rendered as an `ApiResponse` envelope with a matching status code.
pub struct ApiError(HistoryError);

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        Self(err)
    }
}

pub fn status_for(err: &HistoryError) -> StatusCode {
    match err {
        HistoryError::Validation(_) => StatusCode::BAD_REQUEST,
        HistoryError::Auth(_) => StatusCode::UNAUTHORIZED,
        HistoryError::NotFound(_) => StatusCode::NOT_FOUND,
        HistoryError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        HistoryError::Upstream(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(ApiResponse::<()>::error(self.0.to_string()))).into_response()
    }
}

/// Yahoo callers send a bearer token, Sleeper callers their username.
fn identity_from_headers(source: Source, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let identity = match source {
        Source::Yahoo => headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(Identity::bearer),
        Source::Sleeper => headers
            .get(SLEEPER_USERNAME_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Identity::username),
    };

    match identity {
        Some(identity) if !identity.is_empty() => Ok(identity),
        _ => Err(HistoryError::Auth(format!("missing {} credentials", source.display_name())).into()),
    }
}

// Health check endpoint
async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("League history API is running"))
}

// GET /api/leagues?source=sleeper
#[derive(Deserialize)]
struct LeaguesQuery {
    source: Source,
}

async fn list_leagues_handler(
    State(state): State<AppState>,
    Query(params): Query<LeaguesQuery>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<Vec<LeagueRef>>>, ApiError> {
    let identity = identity_from_headers(params.source, &headers)?;
    let leagues = state.jobs.list_leagues(params.source, &identity).await?;
    Ok(Json(ApiResponse::success(leagues)))
}

// POST /api/report/generate
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub source: Source,
    pub league_id: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: String,
    pub status: JobStatus,
}

async fn generate_report_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<ApiResponse<GenerateResponse>>), ApiError> {
    let identity = identity_from_headers(body.source, &headers)?;
    let job_id = state
        .jobs
        .create(ReportRequest {
            source: body.source,
            league_id: body.league_id,
            identity,
            start_year: body.start_year,
            end_year: body.end_year,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(GenerateResponse {
            job_id,
            status: JobStatus::Pending,
        })),
    ))
}

// GET /api/report/status/{job_id}
async fn report_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ApiResponse<Job>>, ApiError> {
    let job = state.jobs.get_status(&job_id).await?;
    Ok(Json(ApiResponse::success(job)))
}

// GET /api/report/download/{job_id}
async fn download_report_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let path = state.jobs.artifact(&job_id).await?;
    let bytes = tokio::fs::read(&path).await.map_err(HistoryError::from)?;

    let disposition = format!("attachment; filename=\"league-history-{}.pdf\"", job_id);
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobSettings;
    use crate::error::HistoryResult;
    use crate::models::SeasonRecord;
    use crate::services::platform::tests::{game, team};
    use crate::services::{assemble_season, LeaguePlatform, PlatformFactory, SeasonMeta};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct TwoSeasons;

    #[async_trait]
    impl LeaguePlatform for TwoSeasons {
        fn source(&self) -> Source {
            Source::Sleeper
        }

        async fn list_leagues(&self, _identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
            Ok(vec![LeagueRef::new(Source::Sleeper, "42", "Office League")])
        }

        async fn season_metadata(&self, _league: &LeagueRef) -> HistoryResult<SeasonMeta> {
            Ok(SeasonMeta {
                league_name: "Office League".to_string(),
                latest_year: 2023,
            })
        }

        async fn fetch_season(&self, _league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord> {
            if year < 2022 {
                return Err(HistoryError::NotFound(format!("no {} season", year)));
            }
            Ok(assemble_season(
                year,
                vec![team("1", "Ann", 1, 0, 110.0, 100.0), team("2", "Bob", 0, 1, 100.0, 110.0)],
                vec![game(1, "1", "2", 110.0, 100.0)],
            ))
        }
    }

    struct TestFactory;

    impl PlatformFactory for TestFactory {
        fn connect(&self, _source: Source, _identity: &Identity) -> HistoryResult<Arc<dyn LeaguePlatform>> {
            let platform: Arc<dyn LeaguePlatform> = Arc::new(TwoSeasons);
            Ok(platform)
        }
    }

    fn state() -> AppState {
        let settings = JobSettings {
            reports_dir: std::env::temp_dir().join(format!("league-history-api-{}", uuid::Uuid::new_v4())),
            max_concurrent_jobs: 1,
            rate_limit_retries: 0,
            rate_limit_backoff: Duration::ZERO,
            rate_limit_abort_after: 3,
        };
        AppState {
            jobs: JobManager::new(settings, Arc::new(TestFactory)),
        }
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn generate(body: &str, username: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/report/generate")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(name) = username {
            builder = builder.header(SLEEPER_USERNAME_HEADER, name);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router().with_state(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["success"], true);
    }

    #[tokio::test]
    async fn test_generate_requires_identity() {
        let app = create_router().with_state(state());
        let response = app
            .oneshot(generate(r#"{"source": "sleeper", "league_id": "42"}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("Sleeper"));
    }

    #[tokio::test]
    async fn test_generate_rejects_bad_range() {
        let app = create_router().with_state(state());
        let response = app
            .oneshot(generate(
                r#"{"source": "sleeper", "league_id": "42", "start_year": 2023, "end_year": 2020}"#,
                Some("mike"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let app = create_router().with_state(state());
        let response = app
            .oneshot(Request::builder().uri("/api/report/status/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_generate_then_download() {
        let state = state();
        let app = create_router().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(generate(r#"{"source": "sleeper", "league_id": "42"}"#, Some("mike")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = json_body(response).await;
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["status"], "pending");

        let job = state.jobs.wait(&job_id).await.unwrap();
        assert_eq!(job.years_covered, vec![2022, 2023]);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/report/status/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["progress"], 100);
        assert!(body["data"].get("result_path").is_none());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/report/download/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));

        if let Some(dir) = job.result_path.as_ref().and_then(|p| p.parent()) {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[tokio::test]
    async fn test_list_leagues() {
        let app = create_router().with_state(state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/leagues?source=sleeper")
                    .header(SLEEPER_USERNAME_HEADER, "mike")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["data"][0]["display_name"], "Office League");
    }
}
