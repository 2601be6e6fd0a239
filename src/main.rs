use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classroom::api::router;
use classroom::config::CourseConfig;
use classroom::github::{GitHubConfig, GitHubHttpClient};
use classroom::services::LifecycleController;
use classroom::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "classroom=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CourseConfig::new_from_env()?;
    let github = GitHubHttpClient::connect(GitHubConfig::from(&config)).await?;

    let mut controller = LifecycleController::new(config, Arc::new(github));
    controller.load().await?;

    let state = AppState::new(controller);
    let app = router(state);

    let addr: SocketAddr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
        .parse()?;
    info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
