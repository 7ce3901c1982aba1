//! HTTP + SSE transport for the Model Context Protocol
//!
//! JSON-RPC over `POST /mcp`, server push over `GET /mcp/events`, and public health and discovery
//! endpoints.

pub mod handlers;
