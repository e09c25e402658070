use std::sync::Arc;

use chrono::FixedOffset;
use db::DBService;
use secrecy::ExposeSecret;
use services::services::{
    assistant::AssistantService,
    auth::{AuthService, FirebaseIdentity, IdentityProvider, SessionTokens},
    config::Config,
    gemini_api::{GeminiApiClient, TextGenerator},
    relay::RelayService,
    task_repo::TaskRepo,
};

pub mod error;
pub mod middleware;
pub mod routes;

/// Shared handles passed to every route.
#[derive(Clone)]
pub struct AppState {
    pub tasks: TaskRepo,
    pub relay: RelayService,
    pub assistant: AssistantService,
    pub auth: AuthService,
    pub utc_offset: FixedOffset,
}

impl AppState {
    pub fn new(
        db: &DBService,
        generator: Arc<dyn TextGenerator>,
        identity: Option<Arc<dyn IdentityProvider>>,
        tokens: SessionTokens,
        prompt_max_chars: usize,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            tasks: TaskRepo::new(db.pool.clone()),
            relay: RelayService::new(generator.clone(), prompt_max_chars),
            assistant: AssistantService::new(generator),
            auth: AuthService::new(db.pool.clone(), identity, Arc::new(tokens)),
            utc_offset,
        }
    }

    /// Wires the production Gemini client and Firebase identity from `config`.
    pub fn from_config(config: &Config, db: &DBService) -> anyhow::Result<Self> {
        let generator: Arc<dyn TextGenerator> = Arc::new(GeminiApiClient::new(
            config.gemini_api_key.expose_secret().to_string(),
            config.gemini_model.clone(),
        )?);
        let identity = match &config.firebase_api_key {
            Some(key) => Some(
                Arc::new(FirebaseIdentity::new(key.expose_secret().to_string())?)
                    as Arc<dyn IdentityProvider>,
            ),
            None => None,
        };
        let tokens = SessionTokens::new(&config.session_secret, config.session_ttl_hours);

        Ok(Self::new(
            db,
            generator,
            identity,
            tokens,
            config.prompt_max_chars,
            config.utc_offset,
        ))
    }
}
