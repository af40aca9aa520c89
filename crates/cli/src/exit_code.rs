// Consistent exit codes for scriptum-verify.
//
//   0 = success, nothing to report
//   1 = integrity mismatches found
//   2 = usage/config error
//   3 = unreadable or malformed input
//   4 = any other failure

use std::process;

use scriptum_integrity::config::ConfigError;
use scriptum_integrity::corpus::CorpusError;
use scriptum_integrity::hash::HashEngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Mismatch = 1,
    Usage = 2,
    InvalidInput = 3,
    Error = 4,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Clean result or mismatches found.
    pub fn from_clean(clean: bool) -> Self {
        if clean {
            Self::Success
        } else {
            Self::Mismatch
        }
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<ConfigError>().is_some()
                || cause.downcast_ref::<HashEngineError>().is_some()
            {
                return Self::Usage;
            }
            if let Some(corpus_err) = cause.downcast_ref::<CorpusError>() {
                return match corpus_err {
                    CorpusError::ChecksumDrift { .. } => Self::Mismatch,
                    CorpusError::Deserialize(_) | CorpusError::Apply { .. } => Self::InvalidInput,
                    CorpusError::Serialize(_) => Self::Error,
                };
            }
            if cause.downcast_ref::<serde_json::Error>().is_some() {
                return Self::InvalidInput;
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidData => {
                        Self::InvalidInput
                    }
                    _ => Self::Error,
                };
            }
        }
        Self::Error
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Mismatch.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::InvalidInput.code(), 3);
        assert_eq!(ExitCode::Error.code(), 4);
    }

    #[test]
    fn clean_maps_to_success() {
        assert_eq!(ExitCode::from_clean(true), ExitCode::Success);
        assert_eq!(ExitCode::from_clean(false), ExitCode::Mismatch);
    }

    #[test]
    fn missing_file_is_invalid_input() {
        let err =
            std::fs::read("/definitely/not/here.json").context("reading snapshot").unwrap_err();
        assert_eq!(ExitCode::from_error(&err), ExitCode::InvalidInput);
    }

    #[test]
    fn config_error_in_chain_is_usage() {
        let err =
            anyhow::Error::new(ConfigError::Validation("bad".into())).context("loading config");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Usage);
    }

    #[test]
    fn checksum_drift_is_mismatch() {
        let err = anyhow::Error::new(CorpusError::ChecksumDrift {
            index: 3,
            stage: "pre-op",
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(ExitCode::from_error(&err), ExitCode::Mismatch);
    }

    #[test]
    fn generic_error_is_error() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
