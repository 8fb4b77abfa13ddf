use std::sync::Arc;

use axum::http::HeaderValue;

use crate::{
    admission::Admission,
    config::Config,
    relay::{EchoPolicy, RelayHub},
    store::RoomStore,
    utils::jwt::{CredentialIssuer, JwtIssuer},
};

/* ------------ everything a handler can reach ------------ */
#[derive(Clone)]
pub struct AppState {
    pub store: RoomStore,
    pub admission: Admission,
    pub hub: RelayHub,
    pub cors_origin: Option<HeaderValue>,
}

impl AppState {
    /// Wire the components once at start-up.
    pub fn new(store: RoomStore, config: &Config) -> Self {
        let issuer: Arc<dyn CredentialIssuer> = Arc::new(JwtIssuer::new(
            config.jwt_secret.clone(),
            config.credential_ttl_seconds,
        ));
        Self::with_issuer(store, issuer, config)
    }

    pub fn with_issuer(store: RoomStore, issuer: Arc<dyn CredentialIssuer>, config: &Config) -> Self {
        let hub = RelayHub::new(
            store.clone(),
            EchoPolicy::from_flag(config.echo_to_sender),
            config.relay_channel_capacity,
        );
        let admission = Admission::new(store.clone(), issuer);
        Self {
            store,
            admission,
            hub,
            cors_origin: config.cors_allowed_origin.clone(),
        }
    }
}
