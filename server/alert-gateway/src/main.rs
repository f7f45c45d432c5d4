//! Binary entrypoint for the alert gateway.

use axum::{routing::get, routing::post, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use alert_gateway::dispatch::LoggingSink;
use alert_gateway::targeting::InMemoryDirectory;
use alert_gateway::{AppState, GatewayConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "alert_gateway=info,correlation_engine=info".into()),
    )
    .init();

  let config = GatewayConfig::from_env();
  let port: u16 = std::env::var("PORT")
    .unwrap_or_else(|_| "5006".into())
    .parse()
    .expect("PORT must be a valid u16");

  // Stand-ins until the surrounding product wires in its account directory
  // and delivery services.
  let directory = Arc::new(InMemoryDirectory::default());
  let sink = Arc::new(LoggingSink::default());
  let state = Arc::new(AppState::new(config, directory, sink));

  if let Err(e) = state.supervisor.ensure_started().await {
    tracing::warn!(error = %e, "correlation worker not started; will retry on first event");
  }
  alert_gateway::spawn_summary_listener(state.clone());

  let app = Router::new()
    .route("/health", get(alert_gateway::health))
    .route("/webhook/:org_id", post(alert_gateway::webhook))
    .layer(CorsLayer::permissive())
    .with_state(state);

  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  println!("alert-gateway listening on http://{}", addr);

  let listener = tokio::net::TcpListener::bind(addr).await?;
  axum::serve(listener, app).await?;

  Ok(())
}
