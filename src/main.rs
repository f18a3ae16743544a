//! FaunaSphere - Grounded species research with generated field imagery.
//!
//! Runs the local session API. A presentation layer drives the session
//! through HTTP; the session looks species up through the Gemini API and
//! keeps favorites, search history and the daily streak in SQLite.
//!
//! # API Endpoints
//!
//! - `GET /session` - Current profile, view and daily challenge
//! - `POST /search` - Look up a species
//! - `POST /reset` - Return to the idle view
//! - `POST /favorites/toggle`, `DELETE /favorites/:name` - Manage favorites
//! - `POST /slides/next|previous|:index` - Image slideshow
//! - `POST /quiz/start|answer|next` - Species quiz
//! - `PUT /credential` - Select the API key
//! - `GET /challenge` - Today's challenge animal
//! - `GET /health` - Health check

use std::sync::Arc;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use faunasphere::api::{AppState, router};
use faunasphere::config::Config;
use faunasphere::content::ContentClient;
use faunasphere::controller::{SessionController, local_clock};
use faunasphere::credentials::{CredentialGate, KeyRing};
use faunasphere::data_sources::GeminiClient;
use faunasphere::storage::Storage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default log level is INFO; the API key is never logged at any level.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("faunasphere=info".parse()?))
        .init();

    let config = Config::from_env();
    info!(
        addr = %config.listen_addr(),
        db_url = %config.database_url,
        text_model = %config.models.text_model,
        image_model = %config.models.image_model,
        "Starting FaunaSphere"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let keys = KeyRing::from_env();
    if !keys.has_selected_key().await {
        warn!("No API key in environment; lookups will fail until one is selected");
    }

    let gemini =
        GeminiClient::with_timeout(&config.gemini_base_url, keys.clone(), config.http_timeout)?;
    let content = ContentClient::new(Arc::new(gemini), config.models.clone());

    let gate = Arc::new(keys.clone());
    let controller = SessionController::start(content, storage, gate, local_clock()).await?;

    let app = router(AppState { controller, keys })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "FaunaSphere is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
