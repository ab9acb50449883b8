use crate::surface::SurfaceError;
use shared::{ConfigError, StoreError};

/// Errors surfaced to callers of the sidebar manager.
///
/// Template and per-entry display failures never show up here; they are
/// absorbed while rendering.
#[derive(Debug, thiserror::Error)]
pub enum SidebarError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("preference store error: {0}")]
    Store(#[from] StoreError),

    #[error("display surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("sidebar manager must be initialized inside a tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, SidebarError>;
