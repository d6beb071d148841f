//! # Strata Node
//!
//! Serves one Strata host over HTTP and WebSocket.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use serde_json::{json, Map, Value};
use strata_core::DomainSchema;
use strata_effects::{handler_fn, EffectContext, EffectHandler, HandlerOutput};
use strata_host::{Host, HostConfig};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod api;
mod state;

use state::AppState;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Effect type of the built-in log handler.
const LOG_EFFECT: &str = "system.log";

/// Records the effect params under `$host.log`, keyed by requirement id.
fn log_effect() -> impl EffectHandler {
    handler_fn(|ctx: EffectContext| async move {
        info!(requirement = %ctx.requirement().id, params = %ctx.params(), "📝 system.log");
        let mut entry = Map::new();
        entry.insert(ctx.requirement().id.clone(), ctx.params().clone());
        let patch = json!({"op": "merge", "path": "$host.log", "value": entry});
        Ok::<_, anyhow::Error>(HandlerOutput::from(patch))
    })
}

fn load_schema(path: &Path) -> anyhow::Result<DomainSchema> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing schema {}", path.display()))?;
    Ok(DomainSchema::from_json(value)?)
}

/// Build the host with the node's built-in effects.
fn build_host(schema: DomainSchema, config: HostConfig) -> anyhow::Result<Host> {
    let host = Host::builder(schema)
        .config(config)
        .effect(LOG_EFFECT, log_effect())
        .build()?;
    Ok(host)
}

/// Run the Strata node server.
pub async fn run_server(addr: SocketAddr, schema_path: &Path) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Strata Node starting...");

    let schema = load_schema(schema_path)?;
    info!("📐 Loaded schema {}@{}", schema.id, schema.version);

    let host = build_host(schema, HostConfig::from_env())?;
    let app = create_router(AppState::new(host));

    info!("🌐 Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router.
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/v1/keys", get(api::keys::list_keys))
        .route("/api/v1/keys/:key/intents", post(api::intents::dispatch_intent))
        .route("/api/v1/keys/:key/preview", post(api::intents::preview_intent))
        .route("/api/v1/keys/:key/patches", post(api::keys::apply_patches))
        .route("/api/v1/keys/:key/snapshot", get(api::keys::get_snapshot))
        .route("/ws/trace", get(api::ws::trace_stream))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr: SocketAddr = std::env::var("STRATA_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_string())
        .parse()
        .context("STRATA_ADDR is not a socket address")?;
    let schema_path = std::env::var("STRATA_SCHEMA").context("STRATA_SCHEMA must name a schema file")?;
    run_server(addr, Path::new(&schema_path)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use serde_json::json;

    fn server() -> TestServer {
        let schema = DomainSchema::from_json(json!({
            "id": "counter",
            "version": "1.0.0",
            "state": {"fields": {"count": {"type": "number", "default": 0}}},
            "actions": {
                "inc": {"flow": {"kind": "patch", "op": "set", "path": "count",
                    "value": {"kind": "add", "left": {"kind": "get", "path": "count"}, "right": {"kind": "lit", "value": 1}}}},
                "note": {"flow": {"kind": "effect", "type": "system.log",
                    "params": {"msg": {"kind": "get", "path": "input.msg"}}}}
            }
        }))
        .unwrap();
        let host = build_host(schema, HostConfig::default()).unwrap();
        TestServer::new(create_router(AppState::new(host))).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = server().get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["schema"], json!("counter@1.0.0"));
    }

    #[tokio::test]
    async fn test_dispatch_and_wait() {
        let server = server();
        let response = server
            .post("/api/v1/keys/main/intents")
            .add_query_param("wait", "true")
            .json(&json!({"type": "inc", "intentId": "i-1"}))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["intentId"], json!("i-1"));
        assert_eq!(body["snapshot"]["data"]["count"], json!(1));

        let keys: Value = server.get("/api/v1/keys").await.json();
        assert_eq!(keys["keys"], json!(["main"]));
    }

    #[tokio::test]
    async fn test_empty_intent_id_rejected() {
        let response = server()
            .post("/api/v1/keys/main/intents")
            .json(&json!({"type": "inc", "intentId": ""}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_patches_then_snapshot() {
        let server = server();
        server
            .post("/api/v1/keys/main/patches")
            .json(&json!({"patches": [{"op": "set", "path": "count", "value": 41}]}))
            .await
            .assert_status(StatusCode::ACCEPTED);

        let body: Value = server
            .post("/api/v1/keys/main/intents")
            .add_query_param("wait", "true")
            .json(&json!({"type": "inc"}))
            .await
            .json();
        assert_eq!(body["snapshot"]["data"]["count"], json!(42));
    }

    #[tokio::test]
    async fn test_unknown_key_snapshot() {
        server()
            .get("/api/v1/keys/nobody/snapshot")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preview_does_not_create_key() {
        let server = server();
        let body: Value = server
            .post("/api/v1/keys/main/preview")
            .json(&json!({"type": "inc", "intentId": "p-1"}))
            .await
            .json();
        assert_eq!(body["status"], json!("complete"));
        assert_eq!(body["snapshot"]["data"]["count"], json!(1));

        let keys: Value = server.get("/api/v1/keys").await.json();
        assert_eq!(keys["keys"], json!([]));
    }

    #[tokio::test]
    async fn test_system_log_effect() {
        let body: Value = server()
            .post("/api/v1/keys/main/intents")
            .add_query_param("wait", "true")
            .json(&json!({"type": "note", "input": {"msg": "hello"}, "intentId": "n-1"}))
            .await
            .json();

        let log = body["snapshot"]["data"]["$host"]["log"].as_object().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.values().next().unwrap(), &json!({"msg": "hello"}));
        assert_eq!(body["status"], json!("idle"));
    }
}
