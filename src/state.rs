//! Application state: configuration, the remote assessment client and the session store.

use tracing::{info, instrument};

use crate::api::AssessmentApi;
use crate::config::PortalConfig;
use crate::error::Result;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub config: PortalConfig,
    pub api: AssessmentApi,
    pub sessions: SessionStore,
}

impl AppState {
    /// Build the remote client and an empty session store from loaded config.
    #[instrument(level = "info", skip_all)]
    pub fn new(config: PortalConfig) -> Result<Self> {
        let api = AssessmentApi::new(&config.remote)?;
        info!(
            target: "assessment_portal",
            base_url = %api.base_url(),
            timeout_secs = config.remote.timeout_secs,
            max_retries = config.remote.max_retries,
            session_idle_secs = config.server.session_idle_secs,
            "Assessment server client ready"
        );
        let sessions = SessionStore::new(config.server.session_idle());
        Ok(Self { config, api, sessions })
    }
}
