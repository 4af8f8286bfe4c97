//! Immutable configuration value object. Built once by the (out-of-scope)
//! environment loader and handed to [`crate::Server::new`]; the core never
//! reads the environment itself.

use std::path::PathBuf;

/// Minimum length required for a configured auth token, per the external
/// interface contract. Enforced by the loader, not the core — kept here so
/// both sides agree on the number.
pub const MIN_AUTH_TOKEN_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Configuration {
    /// `VIBE_ROOT` — the workspace root. Must exist before [`crate::Server::new`]
    /// is called for anything but `init_project`/write operations, which may
    /// create it on demand.
    pub root: PathBuf,
    /// Path to the SQLite index database file.
    pub db_path: PathBuf,
    /// Opaque bearer token checked by the (out-of-scope) transport layer.
    /// Not interpreted by the core.
    pub auth_token: Option<String>,
    pub read_only: bool,
    pub webhooks_enabled: bool,
}

impl Configuration {
    pub fn new(root: PathBuf, db_path: PathBuf) -> Self {
        Self {
            root,
            db_path,
            auth_token: None,
            read_only: false,
            webhooks_enabled: true,
        }
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_webhooks_enabled(mut self, enabled: bool) -> Self {
        self.webhooks_enabled = enabled;
        self
    }

    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token;
        self
    }
}
