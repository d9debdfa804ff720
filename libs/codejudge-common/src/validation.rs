/// Ceiling checks for challenge testcases, run before a challenge is
/// stored so that the sandbox only ever sees limits it can honour.
use thiserror::Error;

use crate::types::ChallengeTestcase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_memory_bytes: u64,
    pub max_time_limit_ms: u64,
}

/// Testcases are numbered from 1 in the order they were given
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("testcase #{index}: memory limit must be greater than zero")]
    ZeroMemoryLimit { index: usize },

    #[error("testcase #{index}: max memory exceeded sandbox limit ({limit} > {max} bytes)")]
    MemoryLimitExceeded { index: usize, limit: u64, max: u64 },

    #[error("testcase #{index}: time limit must be greater than zero")]
    ZeroTimeLimit { index: usize },

    #[error("testcase #{index}: max run time exceeded sandbox limit ({limit} > {max} ms)")]
    TimeLimitExceeded { index: usize, limit: u64, max: u64 },
}

pub fn validate_testcases(
    testcases: &[ChallengeTestcase],
    limits: &Limits,
) -> Result<(), ValidationError> {
    for (position, testcase) in testcases.iter().enumerate() {
        let index = position + 1;

        if testcase.memory_limit == 0 {
            return Err(ValidationError::ZeroMemoryLimit { index });
        }
        if testcase.memory_limit > limits.max_memory_bytes {
            return Err(ValidationError::MemoryLimitExceeded {
                index,
                limit: testcase.memory_limit,
                max: limits.max_memory_bytes,
            });
        }
        if testcase.time_limit_ms == 0 {
            return Err(ValidationError::ZeroTimeLimit { index });
        }
        if testcase.time_limit_ms > limits.max_time_limit_ms {
            return Err(ValidationError::TimeLimitExceeded {
                index,
                limit: testcase.time_limit_ms,
                max: limits.max_time_limit_ms,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::MEMORY_MB;

    const LIMITS: Limits = Limits {
        max_memory_bytes: 512 * MEMORY_MB,
        max_time_limit_ms: 10_000,
    };

    fn testcase(memory_limit: u64, time_limit_ms: u64) -> ChallengeTestcase {
        ChallengeTestcase {
            id: 0,
            challenge_id: 0,
            input: "1\n".to_string(),
            expected_output: "1\n".to_string(),
            memory_limit,
            time_limit_ms,
        }
    }

    #[test]
    fn test_accepts_limits_within_bounds() {
        let testcases = vec![
            testcase(64 * MEMORY_MB, 1000),
            testcase(512 * MEMORY_MB, 10_000),
        ];
        assert_eq!(validate_testcases(&testcases, &LIMITS), Ok(()));
    }

    #[test]
    fn test_rejects_zero_limits() {
        assert_eq!(
            validate_testcases(&[testcase(0, 1000)], &LIMITS),
            Err(ValidationError::ZeroMemoryLimit { index: 1 })
        );
        assert_eq!(
            validate_testcases(&[testcase(MEMORY_MB, 1000), testcase(MEMORY_MB, 0)], &LIMITS),
            Err(ValidationError::ZeroTimeLimit { index: 2 })
        );
    }

    #[test]
    fn test_rejects_limits_above_ceiling() {
        let err = validate_testcases(&[testcase(513 * MEMORY_MB, 1000)], &LIMITS).unwrap_err();
        assert!(matches!(err, ValidationError::MemoryLimitExceeded { index: 1, .. }));
        assert!(err.to_string().contains("max memory exceeded sandbox limit"));

        let err = validate_testcases(&[testcase(MEMORY_MB, 10_001)], &LIMITS).unwrap_err();
        assert!(matches!(err, ValidationError::TimeLimitExceeded { index: 1, .. }));
    }

    #[test]
    fn test_empty_list_is_valid() {
        assert_eq!(validate_testcases(&[], &LIMITS), Ok(()));
    }
}
