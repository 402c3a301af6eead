use std::sync::Arc;

use crate::core::config::Settings;
use crate::store::DynAttemptStore;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: DynAttemptStore,
}

impl AppState {
    pub(crate) fn new(settings: Settings, store: DynAttemptStore) -> Self {
        Self { inner: Arc::new(InnerState { settings, store }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &DynAttemptStore {
        &self.inner.store
    }
}
