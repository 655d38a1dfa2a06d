//! The inner realm: value model, intrinsics, and the evaluator.
//!
//! The realm owns a private set of intrinsics — the curated namespace
//! (Math, JSON, Array, Object, String, Number, Boolean, Date, the
//! URI/number helpers), seeded fresh per execution and frozen. There is no way to materialize a function from a string: the
//! runtime has no `eval`, no `Function`, and no code loader, so
//! code-from-strings fails at the realm level independent of what the
//! validator caught. Host data enters only through the membrane.

pub mod interpreter;
pub mod intrinsics;
pub mod value;

pub use interpreter::{run_program, Interp};
