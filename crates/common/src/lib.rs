//! testforge Common Library
//!
//! The scenario intermediate representation shared by the generator, the
//! selector-repair session and the code generator.

pub mod error;
pub mod outcome;
pub mod types;

pub use error::{Error, Result};
pub use outcome::Outcome;
pub use types::*;

/// testforge version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
