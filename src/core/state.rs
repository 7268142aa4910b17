use std::sync::Arc;

use crate::core::config::Settings;
use crate::services::sandbox::Sandbox;
use crate::services::store::GradingStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn GradingStore>,
    sandbox: Arc<dyn Sandbox>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn GradingStore>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, store, sandbox }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn GradingStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn sandbox(&self) -> &dyn Sandbox {
        self.inner.sandbox.as_ref()
    }
}
