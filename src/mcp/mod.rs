//! Model Context Protocol (MCP) engine
//!
//! JSON-RPC framing and error mapping, the method router, per-session request lifecycle and
//! cancellation, and argument completion.

pub mod completion;
pub mod lifecycle;
pub mod method;
pub mod rpc;
pub mod server;
pub mod session;
