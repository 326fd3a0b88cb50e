//! Feedback-driven preference learning
//!
//! The pipeline has three stages. The [`recorder`] turns rated tasks into
//! episode records, the [`distiller`] compresses episode batches into scoped
//! rules, and the [`selector`] picks the rules that apply to a task and
//! renders them for the agent prompt. [`project`] holds the project-type
//! inference both the recorder context and the selector depend on.

pub mod distiller;
pub mod project;
pub mod recorder;
pub mod selector;

pub use distiller::{DistillationOutcome, RuleDistiller};
pub use project::{ProjectTypeCache, infer_project_type, infer_project_type_from_text};
pub use recorder::EpisodeRecorder;
pub use selector::{RuleSelection, RuleSelector, render_rules};
