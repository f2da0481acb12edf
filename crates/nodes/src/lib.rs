//! `nodes` crate — the `Node` trait and its supporting contract types.
//!
//! Every node — built-in or supplied by a host application (HTTP, LLM,
//! shell, MCP, file I/O, …) — implements [`Node`]'s three-phase
//! `prep`/`exec`/`post` lifecycle. The engine crate dispatches execution
//! through this trait object and wraps it in the standard wrapper chain;
//! concrete node behaviour itself lives outside this crate.

pub mod error;
pub mod traits;
pub mod mock;

pub use error::NodeError;
pub use traits::{ExecutionContext, Node, NodeInterface, ParamSpec, ParamType, StoreView};
