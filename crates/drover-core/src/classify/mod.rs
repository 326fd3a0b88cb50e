//! Pure classifiers: failure taxonomy and execution-strategy complexity
//!
//! Both are deterministic functions over explicit inputs. They consult no
//! store and spawn nothing, which keeps them unit-testable in isolation.

pub mod complexity;
pub mod failure;

pub use complexity::{Complexity, classify_complexity};
pub use failure::{FailureClassification, FailureKind, classify_failure};
