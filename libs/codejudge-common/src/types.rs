use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Strongly-typed language enum
/// Every variant has exactly one row in the recipe table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Go,
    C,
    Cpp,
    Rust,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl Language {
    /// Returns all language variants
    /// This is the single source of truth for available languages
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python,
            Language::Go,
            Language::C,
            Language::Cpp,
            Language::Rust,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Go => "go",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
        }
    }
}

impl FromStr for Language {
    type Err = UnknownLanguage;

    /// Case-insensitive; `c++` is accepted as an alias for `cpp`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "go" => Ok(Language::Go),
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "rust" => Ok(Language::Rust),
            _ => Err(UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-testcase verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TestcaseStatus {
    Pending,
    Correct,
    Wrong,
    #[serde(rename = "NOTSOLVE")]
    NotSolve,
}

impl fmt::Display for TestcaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestcaseStatus::Pending => "PENDING",
            TestcaseStatus::Correct => "CORRECT",
            TestcaseStatus::Wrong => "WRONG",
            TestcaseStatus::NotSolve => "NOTSOLVE",
        };
        f.write_str(s)
    }
}

/// Submission-level verdict
///
/// `CompileError` is kept distinct from `Wrong` so that a failed build
/// can be reported (and re-mapped) without touching testcase verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Correct,
    Wrong,
    CompileError,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Correct => "CORRECT",
            SubmissionStatus::Wrong => "WRONG",
            SubmissionStatus::CompileError => "COMPILE_ERROR",
        };
        f.write_str(s)
    }
}

/// Hidden testcase owned by a challenge (read-only during grading)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeTestcase {
    pub id: u64,
    pub challenge_id: u64,
    pub input: String,
    pub expected_output: String,
    /// Bytes, passed to the runtime verbatim
    pub memory_limit: u64,
    pub time_limit_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub testcases: Vec<ChallengeTestcase>,
}

/// Per-testcase grading row belonging to one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTestcase {
    pub id: u64,
    pub submission_id: u64,
    pub challenge_testcase_id: u64,
    pub status: TestcaseStatus,
    pub output: String,
}

impl SubmissionTestcase {
    /// Placeholder created at submission time, before any run
    pub fn pending(challenge_testcase_id: u64) -> Self {
        Self {
            id: 0,
            submission_id: 0,
            challenge_testcase_id,
            status: TestcaseStatus::Pending,
            output: String::new(),
        }
    }
}

/// Intake payload: what a user hands in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubmission {
    pub challenge_id: u64,
    pub language: String,
    pub source_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: u64,
    pub challenge_id: u64,
    pub language: String,
    pub source_code: String,
    pub status: SubmissionStatus,
    /// Compiler diagnostics, only filled when the build failed
    #[serde(default)]
    pub compile_output: String,
    pub testcases: Vec<SubmissionTestcase>,
}

impl Submission {
    /// True iff every testcase reached `Correct`.
    /// Pending (never run), Wrong and NotSolve all make it false.
    pub fn is_correct(&self) -> bool {
        self.testcases
            .iter()
            .all(|tc| tc.status == TestcaseStatus::Correct)
    }
}
