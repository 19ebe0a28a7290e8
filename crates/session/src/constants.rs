//! Storage keys and header scheme for the persisted session
//!
//! The keys match what the browser client kept in local storage, so a
//! session file can be seeded from an exported browser session.

/// Key holding the short-lived access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Key holding the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Authorization scheme prefix for the access token
pub const BEARER_SCHEME: &str = "Bearer";
