/// Verdict rules
///
/// Pure functions: raw run results in, statuses out. Nothing here knows
/// about Docker, Redis or scheduling.
use codejudge_common::types::{SubmissionStatus, SubmissionTestcase, TestcaseStatus};

use crate::sandbox::{SandboxError, SandboxRunResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub status: TestcaseStatus,
    /// Recorded on the testcase; stdout followed by stderr
    pub output: String,
}

/// Judge one run against the expected output.
///
/// A run error or a non-zero exit (timeouts and OOM kills included) is
/// `Wrong`. Otherwise the combined output must equal `expected` exactly,
/// trailing newline and all.
pub fn judge(result: &Result<SandboxRunResult, SandboxError>, expected: &str) -> Verdict {
    match result {
        Err(_) => Verdict {
            status: TestcaseStatus::Wrong,
            output: String::new(),
        },
        Ok(run) => {
            let output = run.output();
            let status = if run.exit_code == 0 && !run.timed_out && output == expected {
                TestcaseStatus::Correct
            } else {
                TestcaseStatus::Wrong
            };
            Verdict { status, output }
        }
    }
}

/// Submission verdict once every testcase task has been joined
pub fn overall_status(testcases: &[SubmissionTestcase]) -> SubmissionStatus {
    if testcases
        .iter()
        .all(|tc| tc.status == TestcaseStatus::Correct)
    {
        SubmissionStatus::Correct
    } else {
        SubmissionStatus::Wrong
    }
}
