use std::sync::Arc;
use std::time::Duration;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assistant_relay::{
    api::{chat::TEST_SESSION_KEY, create_router, AppState},
    assistant::{AssistantGateway, ConversationSessionManager},
    auth::AuthService,
    config::Config,
    crypto::TokenIssuer,
    db::UserRepository,
    error::AppError,
};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,assistant_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting assistant relay v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    tracing::info!(assistant = ?config.assistant, "Configuration loaded");

    let db = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected: {}", config.database_url);

    sqlx::migrate!("./migrations").run(&db).await?;

    tracing::info!("Database migrations completed");

    let tokens = Arc::new(TokenIssuer::new(
        &config.token.secret,
        config.token.algorithm,
        config.token.expiry_hours,
    ));
    tracing::info!(algorithm = %tokens.algorithm(), "Token issuer ready");

    let auth = Arc::new(AuthService::new(
        Arc::new(UserRepository::new(db.clone())),
        tokens,
    ));

    let gateway = AssistantGateway::new(&config.assistant, config.request_timeout_secs)?;
    let sessions = Arc::new(ConversationSessionManager::new(Arc::new(gateway)));

    match &config.assistant.test_session {
        Some(session_id) => {
            sessions.seed(TEST_SESSION_KEY, session_id).await;
        }
        None => tracing::info!("No ASSISTANT_TEST_SESSION configured, /test will open a session on first use"),
    }

    let state = AppState {
        auth,
        sessions,
        config: config.clone(),
    };

    // Build router
    let app = create_router(state);

    // Bind and serve
    let addr = config.server_address();
    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API Endpoints:");
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  POST /signup            - Register and receive a token");
    tracing::info!("  POST /signin            - Sign in and receive a token");
    tracing::info!("  GET  /test?message=...  - Relay a message as the test user (no auth)");
    tracing::info!("  POST /restartSession    - Reset the test user's session (no auth)");
    tracing::info!("  POST /chat              - Relay a message (requires auth)");
    tracing::info!("  POST /chat/restart      - Reset your session (requires auth)");
    tracing::info!("  GET  /me                - Token claims (requires auth)");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
