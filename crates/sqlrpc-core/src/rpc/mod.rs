//! The v1 routing protocol.
//!
//! - `types`: request and envelope types
//! - `error`: `RpcError` and its status/error-record mapping
//! - `binding`: meta-parameter extraction and parameter decoding
//! - `router`: the transport-agnostic `RpcRouter`

pub mod binding;
pub mod error;
pub mod router;
pub mod types;

pub use error::RpcError;
pub use router::{RpcRouter, PROTOCOL_VERSION};
pub use types::{JsonError, JsonResponse, RpcContext, RpcRequest, RpcResponse};
