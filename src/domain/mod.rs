//! Content discovery catalog exposed over MCP
//!
//! Fixed vocabularies plus the tool, resource and prompt providers built on them.

pub mod catalog;
pub mod prompts;
pub mod resources;
pub mod tools;
