//! sqlrpc CLI — command implementations shared by the `sqlrpc` binary and
//! its integration tests.

pub mod commands;
