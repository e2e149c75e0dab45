use std::sync::Arc;

use async_trait::async_trait;

use crate::persistence::SettingsStore;
use crate::store::BackendKind;

use super::api::{ChannelError, ChannelSpec, PushChannelProvider, Subscription};

/// Sends each subscription to the provider of the selected backend.
pub struct ChannelRouter {
    local: Arc<dyn PushChannelProvider>,
    hosted: Option<Arc<dyn PushChannelProvider>>,
    settings: SettingsStore,
}

impl ChannelRouter {
    pub fn new(local: Arc<dyn PushChannelProvider>, settings: SettingsStore) -> Self {
        Self {
            local,
            hosted: None,
            settings,
        }
    }

    pub fn with_hosted(mut self, hosted: Arc<dyn PushChannelProvider>) -> Self {
        self.hosted = Some(hosted);
        self
    }
}

#[async_trait]
impl PushChannelProvider for ChannelRouter {
    async fn subscribe(&self, spec: ChannelSpec) -> Result<Subscription, ChannelError> {
        let provider = match self.settings.backend() {
            BackendKind::Local => self.local.clone(),
            BackendKind::Hosted => self
                .hosted
                .clone()
                .ok_or_else(|| ChannelError::Rejected("hosted realtime is not configured".into()))?,
        };
        provider.subscribe(spec).await
    }
}
