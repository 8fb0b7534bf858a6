//! sqlrpc Core — transport-agnostic runtime for declarative RPC services.
//!
//! Services are declared as interfaces carrying a (category, version, name)
//! descriptor. Each method is either backed by a parameterized SQL command
//! or by a registered implementation closure. This crate validates and
//! caches those declarations, compiles and runs SQL commands, and routes
//! `/v1/{category}/{version}/{interface}/{method}` requests into a uniform
//! JSON envelope. It has **no HTTP framework dependency** by default,
//! making it suitable for use in:
//!
//! - HTTP servers (via `sqlrpc-server`)
//! - CLI tools
//!
//! # Feature Flags
//!
//! - `axum` — Enables `IntoResponse` impl on `RpcResponse` for use in axum handlers.

pub mod cache;
pub mod config;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod locator;
pub mod macros;
pub mod registry;
pub mod rpc;
pub mod sql;
pub mod state;
pub mod validate;

// Convenience re-exports
pub use config::Settings;
pub use error::{DescriptorError, ExecutionError};
pub use executor::{Arguments, Executor, Implementation};
pub use registry::{Manifest, ServiceRegistry};
pub use rpc::{RpcRequest, RpcResponse, RpcRouter};
pub use state::{AppState, AppStateInner};
pub use validate::Validator;
