//! Pre-execution static validation.
//!
//! Distinct from the runtime layers: everything here runs over the parsed
//! tree before a single node is evaluated. A violation short-circuits the
//! run with `VALIDATION_FAILED` (or `UNKNOWN_GLOBAL`).

mod folding;
mod redos;
mod rules;
mod tokens;
mod validator;

pub use folding::fold_to_string;
pub use redos::{regex_is_suspicious, REDOS_RULE};
pub use rules::ValidatorRulesConfig;
pub use tokens::*;
pub use validator::{validate_program, ValidationError, Validator};
