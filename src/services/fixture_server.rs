//! Local HTTP server that answers platform requests with canned JSON.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::PlatformSettings;

/// Responses keyed by request path (query strings are ignored).
#[derive(Default)]
pub struct Fixtures {
    routes: HashMap<String, (StatusCode, Value)>,
    hits: Mutex<Vec<String>>,
}

impl Fixtures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self, path: &str, body: Value) -> Self {
        self.routes.insert(path.to_string(), (StatusCode::OK, body));
        self
    }

    pub fn status(mut self, path: &str, status: StatusCode) -> Self {
        self.routes.insert(path.to_string(), (status, Value::Null));
        self
    }

    pub async fn serve(self) -> FixtureServer {
        let fixtures = Arc::new(self);
        let app = Router::new().fallback(answer).with_state(fixtures.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        FixtureServer {
            base_url: format!("http://{}", addr),
            fixtures,
        }
    }
}

pub struct FixtureServer {
    pub base_url: String,
    fixtures: Arc<Fixtures>,
}

impl FixtureServer {
    /// Both platforms pointed at this server, with pacing out of the way.
    pub fn settings(&self, max_weeks: u32) -> PlatformSettings {
        PlatformSettings {
            sleeper_base_url: self.base_url.clone(),
            yahoo_base_url: self.base_url.clone(),
            http_timeout: Duration::from_secs(5),
            requests_per_minute: 6000,
            max_weeks,
        }
    }

    /// Paths requested so far, in order.
    pub fn hits(&self) -> Vec<String> {
        self.fixtures.hits.lock().unwrap().clone()
    }

    pub fn was_hit(&self, path: &str) -> bool {
        self.hits().iter().any(|hit| hit == path)
    }
}

async fn answer(State(fixtures): State<Arc<Fixtures>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    fixtures.hits.lock().unwrap().push(path.clone());
    match fixtures.routes.get(&path) {
        Some((status, body)) => (*status, Json(body.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, format!("no fixture for {}", path)).into_response(),
    }
}
