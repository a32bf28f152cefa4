use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bibliodesk::notify::WhatsAppNotifier;
use bibliodesk::state::AppState;
use bibliodesk::{api, config, db, scheduler, seed};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bibliodesk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    // Initialize database
    let db = db::init_db(&config.database_url)
        .await
        .expect("Failed to initialize database");

    if let Err(e) = seed::ensure_admin(&db).await {
        tracing::error!("Failed to create bootstrap admin: {}", e);
    }

    let notifier = Arc::new(WhatsAppNotifier::new(
        config.wa_gateway_url.clone(),
        config.wa_gateway_token.clone(),
    ));
    let state = AppState::new(db, notifier);

    // Check for seed flag
    if std::env::var("SEED_DEMO").is_ok() {
        tracing::info!("Seeding demo data...");
        if let Err(e) = seed::seed_demo_data(&state).await {
            tracing::error!("Failed to seed data: {}", e);
        }
    }

    // Background sweeper over active loans
    let sweeper_state = state.clone();
    let sweep_interval = Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        scheduler::run(sweeper_state, sweep_interval).await;
    });

    // Log bus traffic at debug level so a bare backend still shows what the
    // realtime channel would push.
    let mut events = state.events.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::debug!(topic = %event.topic, payload = %event.payload, "event published");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "event logger lagged behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app = api::app(state, &config.cors_allowed_origins);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Bibliodesk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
