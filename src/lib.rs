// Error taxonomy
pub mod error;

// Server configuration and the declared desired-state document
pub mod config;

// SQLite persistence
pub mod store;

// Password hashing, bearer credentials and at-rest encryption
pub mod credentials;

// Grant resolution and default-grant policy
pub mod grants;

// Declared config reconciliation
pub mod reconcile;

// Bearer header parsing
pub mod auth;

// Request authentication and authorization
pub mod authz;

// External identity providers and directory sync
pub mod providers;

// HTTP API
pub mod api;

pub use error::{Error, Result};
pub use store::Store;
