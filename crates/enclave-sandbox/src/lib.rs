//! The layered sandbox engine.
//!
//! Pipeline: source text → [`security`] validation → [`instrument`] rewrite
//! → execution in the [`realm`] interpreter under the [`governor`]'s
//! counters, with host values wrapped by the [`membrane`], external effects
//! mediated by the [`bridge`], and errors re-materialized by [`sanitize`].
//! [`enclave::Enclave`] drives the pipeline; [`worker`] picks where the
//! interpreter thread runs.

pub mod bridge;
pub mod enclave;
pub mod governor;
pub mod instrument;
pub mod membrane;
pub mod realm;
pub mod sanitize;
pub mod security;
pub mod worker;

pub use bridge::{ToolHandler, ToolResponse};
pub use enclave::{CancelHandle, Enclave};
