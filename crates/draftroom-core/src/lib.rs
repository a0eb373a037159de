// Library root: re-exports all modules so integration tests and the server
// binary can access the crate's public API.

pub mod config;
pub mod db;
pub mod draft;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod ws_server;

pub use engine::{DraftEngine, EngineSettings};
pub use error::{EngineError, PickError};
