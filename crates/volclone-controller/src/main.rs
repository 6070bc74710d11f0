//! Volclone Clone Controller
//!
//! Watches persistent volume claims that request a clone and drives them to
//! completion. Serves health endpoints while the controller runs.
//!
//! # HTTP Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use kube::Client;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use volclone_controller::{
    controller, CaCertGenerator, CloneReconciler, Collaborators, ControllerConfig, FileCaBundle,
    KubeClusterApi, KubeEventSink, TokenKeyType,
};
use volclone_token::{JwtTokenValidator, TokenConfig, TokenValidator};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "volclone-controller",
    })
}

async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "ready")
}

fn create_router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
}

fn load_validator(config: &ControllerConfig) -> Result<Arc<dyn TokenValidator>, Box<dyn std::error::Error>> {
    let pem = std::fs::read(&config.token_public_key_path)?;
    let token_config = TokenConfig::default();
    let validator = match config.token_key_type {
        TokenKeyType::Ed25519 => JwtTokenValidator::from_ed_pem(&token_config, &pem)?,
        TokenKeyType::Rsa => JwtTokenValidator::from_rsa_pem(&token_config, &pem)?,
    };
    Ok(Arc::new(validator))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,volclone=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Volclone Clone Controller");

    // Load configuration from environment
    let listen_addr = std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let config = ControllerConfig::from_env();
    config.validate()?;

    tracing::info!(
        image = %config.cloner_image,
        key_type = ?config.token_key_type,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        "Loaded controller configuration"
    );

    let validator = load_validator(&config)?;
    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let collaborators = Collaborators {
        cluster: Arc::new(KubeClusterApi::new(client.clone())),
        validator,
        certs: Arc::new(CaCertGenerator::new(
            &config.client_ca_cert_path,
            &config.client_ca_key_path,
        )),
        ca_bundle: Arc::new(FileCaBundle::new(&config.ca_bundle_path)),
        events: Arc::new(KubeEventSink::new(client.clone())),
    };
    let namespace = config.watch_namespace.clone();
    let reconciler = CloneReconciler::new(collaborators, config);

    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = TcpListener::bind(&listen_addr).await?;
    serve_while(
        listener,
        controller::run(client, reconciler, namespace.as_deref()),
    )
    .await?;

    tracing::info!("Volclone Clone Controller stopped");
    Ok(())
}

/// Serve the health endpoints until `controller` finishes.
///
/// The controller owns the shutdown signal handling, so the process exits
/// once it stops instead of reporting healthy with nothing reconciling.
async fn serve_while<F>(listener: TcpListener, controller: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        () = controller => {
            tracing::info!("Controller stopped, shutting down HTTP server");
            Ok(())
        }
        result = axum::serve(listener, create_router()).into_future() => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn server_stops_with_controller() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), serve_while(listener, async {}))
            .await
            .expect("server outlived the controller");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn server_answers_while_controller_runs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_while(listener, async {
            let _ = stopped.await;
        }));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::io::AsyncWriteExt::write_all(
            &mut stream,
            b"GET /ready HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await
        .unwrap();
        let mut response = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
            .await
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
