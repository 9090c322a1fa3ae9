//! Optional process-wide facade slot
//!
//! Most code should receive an `Arc<ProtocolFacade>` explicitly. This slot
//! exists for embedders that need to reach the facade from a callback they
//! do not control. The first install wins; the facade lives until exit.

use crate::error::{ProtocolError, Result};
use crate::facade::{ProtocolFacade, ProtocolSettings};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::warn;

static GLOBAL_FACADE: OnceCell<Arc<ProtocolFacade>> = OnceCell::new();

/// Install `facade` as the process-wide instance
pub fn install_global(facade: Arc<ProtocolFacade>) -> Result<Arc<ProtocolFacade>> {
    let mut installed = false;
    let current = GLOBAL_FACADE.get_or_init(|| {
        installed = true;
        Arc::clone(&facade)
    });
    if installed {
        Ok(Arc::clone(current))
    } else {
        warn!("Rejected second protocol facade install");
        Err(ProtocolError::AlreadyInstalled)
    }
}

/// The installed facade
pub fn global() -> Result<Arc<ProtocolFacade>> {
    GLOBAL_FACADE
        .get()
        .map(Arc::clone)
        .ok_or(ProtocolError::NotInstalled)
}

/// The installed facade, creating it from `settings` on first access
pub fn global_or_init(settings: impl FnOnce() -> ProtocolSettings) -> Arc<ProtocolFacade> {
    Arc::clone(GLOBAL_FACADE.get_or_init(|| ProtocolFacade::shared(settings())))
}
