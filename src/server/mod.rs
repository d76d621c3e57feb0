pub mod handlers;
pub mod types;

use crate::{
    Error, Result,
    chat::{ChatResponder, ChatService},
    config::Config,
    model::{Gpt2LanguageModel, LanguageModel},
};
use axum::{Router, routing::post};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub use handlers::AppState;

/// Builds the route table around an already constructed state.
pub fn router(state: AppState, cors: bool) -> Router {
    let app = Router::new()
        .route("/chat", post(handlers::chat))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Wraps a loaded model into the request handler state.
pub fn app_state(model: Arc<dyn LanguageModel>, config: &Config) -> AppState {
    let responder = ChatResponder::new(model, config.generation.clone());
    AppState {
        chat: ChatService::new(responder),
    }
}

pub async fn run(config: Config) -> Result<()> {
    // The model must be fully loaded before the listener exists.
    let model_config = config.model.clone();
    let model = tokio::task::spawn_blocking(move || Gpt2LanguageModel::load(&model_config))
        .await
        .map_err(|e| Error::model_load(format!("model loading task failed: {}", e)))??;
    info!("Model {} ready", config.model.model_id);

    let app = router(app_state(Arc::new(model), &config), config.server.cors);

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);

    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
