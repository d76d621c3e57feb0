use axum::Router;
use axum_test::TestServer;
use chat_responder::{
    config::{Config, GenerationConfig},
    model::LanguageModel,
    server,
};
use std::sync::Arc;

/// Create a test configuration with sensible defaults
pub fn create_test_config() -> Config {
    Config {
        generation: GenerationConfig {
            timeout_secs: Some(5),
            max_concurrent: 2,
            ..GenerationConfig::default()
        },
        ..Config::default()
    }
}

pub fn create_test_app(model: impl LanguageModel + 'static) -> Router {
    create_test_app_with_config(model, &create_test_config())
}

pub fn create_test_app_with_config(model: impl LanguageModel + 'static, config: &Config) -> Router {
    let model: Arc<dyn LanguageModel> = Arc::new(model);
    server::router(server::app_state(model, config), config.server.cors)
}

pub fn create_test_server(model: impl LanguageModel + 'static) -> TestServer {
    TestServer::new(create_test_app(model)).expect("Failed to start test server")
}

/// Sample configuration YAML for testing
pub const SAMPLE_CONFIG_YAML: &str = r#"
server:
  host: "127.0.0.1"
  port: 8080
  logs:
    level: "debug"
model:
  model_id: "microsoft/DialoGPT-small"
generation:
  max_length: 60
  timeout_secs: 30
"#;
