//! Client session state
//!
//! Holds the access/refresh credential pair behind a synchronous key-value
//! capability and decorates outbound requests with it. This crate has no
//! async code: reads and writes are local, total operations, so the
//! orchestrator can check session state without a suspension point.
//!
//! Credential flow:
//! 1. Login flow writes a pair via `SessionStore::write()`
//! 2. Every request is decorated via `attach::decorate()`
//! 3. Renewal replaces the access token via `SessionStore::renew()`
//! 4. Logout or renewal failure removes both tokens via `SessionStore::clear()`

pub mod attach;
pub mod constants;
pub mod credentials;
pub mod store;

pub use attach::decorate;
pub use constants::*;
pub use credentials::{Credential, SessionStore};
pub use store::{FileStore, KeyValueStore, MemoryStore};
