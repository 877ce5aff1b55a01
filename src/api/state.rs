//! Application state for the API server

use crate::Archiver;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the archiver itself is a bundle of shared handles.
#[derive(Clone)]
pub struct AppState {
    /// The archiver the API controls
    pub archiver: Archiver,
}

impl AppState {
    /// Create a new AppState
    pub fn new(archiver: Archiver) -> Self {
        Self { archiver }
    }
}
