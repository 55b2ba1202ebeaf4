// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StarterSaaS shared types
//!
//! Account and user records plus the storage seam used by the billing crate
//! and the worker.

pub mod store;
pub mod types;

pub use store::{
    AccountFilter, AccountStore, DateField, DateWindow, MemoryStore, PgAccountStore, StoreError,
    StoreResult,
};
pub use types::{Account, User};
