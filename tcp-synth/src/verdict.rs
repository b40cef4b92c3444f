//! Mock file-verdict lookup service.
//!
//! Answers every `POST` with a fixed JSON verdict after a fixed delay, so an
//! inline IDS holding a segment for a verdict stays blocked long enough for
//! the retransmission in the trace to arrive.  Lookups are answered one at a
//! time.  Other methods get `405` and unparseable requests `400`, both
//! without waiting.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// The JSON document returned for every lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: String,
    pub file_name: String,
    pub confidence: u8,
}

impl Default for Verdict {
    fn default() -> Self {
        Self {
            verdict: "log".into(),
            file_name: "Test File".into(),
            confidence: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerdictConfig {
    pub bind: SocketAddr,
    /// How long every response is held.
    pub delay: Duration,
    pub verdict: Verdict,
}

impl Default for VerdictConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            delay: Duration::from_secs(3),
            verdict: Verdict::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

struct LookupState {
    delay: Duration,
    verdict: Verdict,
    /// Held for the whole delay so lookups queue behind each other.
    serial: Mutex<()>,
}

/// Router answering `POST` on any path with the configured verdict.
pub fn router(config: &VerdictConfig) -> Router {
    let state = Arc::new(LookupState {
        delay: config.delay,
        verdict: config.verdict.clone(),
        serial: Mutex::new(()),
    });
    Router::new()
        .route("/", post(lookup))
        .route("/*path", post(lookup))
        .with_state(state)
}

async fn lookup(State(state): State<Arc<LookupState>>, body: Bytes) -> Json<Verdict> {
    let _turn = state.serial.lock().await;
    log::info!(
        "[verdict] lookup with {} byte body, holding for {:?}",
        body.len(),
        state.delay
    );
    tokio::time::sleep(state.delay).await;
    log::info!("[verdict] sent verdict {:?}", state.verdict.verdict);
    Json(state.verdict.clone())
}

// ---------------------------------------------------------------------------
// VerdictService
// ---------------------------------------------------------------------------

pub struct VerdictService {
    listener: TcpListener,
    config: VerdictConfig,
}

impl VerdictService {
    pub async fn bind(config: VerdictConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.bind).await?;
        log::info!(
            "[verdict] listening on {} (delay {:?})",
            listener.local_addr()?,
            config.delay
        );
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve lookups until the listener fails.
    pub async fn serve(self) -> std::io::Result<()> {
        let app = router(&self.config);
        axum::serve(self.listener, app).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verdict_serializes_like_the_lookup_service() {
        let json = serde_json::to_value(Verdict::default()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "verdict": "log", "file_name": "Test File", "confidence": 100 })
        );
    }

    #[test]
    fn default_config_holds_for_three_seconds() {
        let config = VerdictConfig::default();
        assert_eq!(config.delay, Duration::from_secs(3));
        assert_eq!(config.bind.port(), 8080);
    }
}
