use std::time::Duration;

use axum::{
    Router, error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse,
    routing::get,
};
use token_shot::TokenBucket;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_token_shot::{RateLimitLayer, ShotError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. One bucket for the whole process: bursts of 10, 5 requests per second
    let bucket = TokenBucket::new(10.0, 5.0)?;

    // 2. Reject as soon as the bucket is empty; never hold a request for long
    let limit = RateLimitLayer::from_bucket(bucket)
        .with_fail_fast(true)
        .with_timeout(Duration::from_secs(5));

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "ok" }))
        .layer(
            ServiceBuilder::new()
                // The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_shot_error))
                .layer(limit)
                // Converts the Route's Infallible to BoxError for the limiter
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on http://127.0.0.1:3000");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Turns limiter errors into responses; 429 carries a Retry-After header.
async fn handle_shot_error(err: BoxError) -> impl IntoResponse {
    if let Some(shot_err) = err.downcast_ref::<ShotError>() {
        shot_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
