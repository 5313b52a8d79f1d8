//! Scenario tests for the session manager.
//!
//! - `harness.rs`     - stub authority, recording navigator, profile probe
//! - `restore.rs`     - cold start: restore, validation gating, revocation
//! - `sign_in.rs`     - direct sign-in / sign-up, failure handling
//! - `sign_out.rs`    - idempotent sign-out, sign-out racing validation
//! - `concurrency.rs` - superseding, routing once per session
//! - `provider.rs`    - provider sign-in through the session manager
//! - `runtime.rs`     - wiring from configuration

mod concurrency;
mod restore;
