pub mod config;
pub mod logging;
pub mod queue;
pub mod recipe;
pub mod redis;
pub mod store;
pub mod types;
pub mod validation;

// Re-export commonly used types for convenience
pub use config::Config;
pub use recipe::{recipe_for, LanguageRecipe, MEMORY_GB, MEMORY_MB};
pub use types::{
    Challenge, ChallengeTestcase, Language, NewSubmission, Submission, SubmissionStatus,
    SubmissionTestcase, TestcaseStatus,
};
