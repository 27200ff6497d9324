//! Exit-code mapping and fatal-error reporting.
//!
//! Interpreted failures never reach this module: an escaped failure is
//! reported by the owning worker and folded into the main process's exit
//! code. What arrives here is either that exit code or a fatal
//! [`VmError`] (link error or invariant violation).

use quill_core::VmError;
use std::process::ExitCode;

/// Successful execution.
pub const EXIT_SUCCESS: u8 = 0;
/// The main process exited on an uncaptured failure or a link error.
pub const EXIT_ERROR: u8 = 1;
/// Command-line usage error.
pub const EXIT_USAGE_ERROR: u8 = 2;
/// Internal invariant violation (should never happen).
pub const EXIT_INTERNAL_ERROR: u8 = 120;

/// Map an application run to the process exit code.
pub fn exit_code_for(result: &Result<i32, VmError>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(*code as u8),
        Err(e) if e.is_link_error() => ExitCode::from(EXIT_ERROR),
        Err(_) => ExitCode::from(EXIT_INTERNAL_ERROR),
    }
}

/// Report a fatal error on stderr.
pub fn report(error: &VmError) {
    if error.is_link_error() {
        eprintln!("quill: link error: {}", error);
    } else {
        eprintln!("quill: internal error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_exit_maps_to_success() {
        assert_eq!(exit_code_for(&Ok(0)), ExitCode::from(EXIT_SUCCESS));
    }

    #[test]
    fn test_failure_exit_code_passes_through() {
        // the default failure exit code of -1 becomes 255
        assert_eq!(exit_code_for(&Ok(-1)), ExitCode::from(255));
        assert_eq!(exit_code_for(&Ok(7)), ExitCode::from(7));
    }

    #[test]
    fn test_link_error_exit_code() {
        let err = VmError::ModuleNotFound("missing".to_string());
        assert_eq!(exit_code_for(&Err(err)), ExitCode::from(EXIT_ERROR));
    }

    #[test]
    fn test_invariant_violation_exit_code() {
        let err = VmError::UnknownOpcode { opcode: 0xff, pc: 3 };
        assert_eq!(exit_code_for(&Err(err)), ExitCode::from(EXIT_INTERNAL_ERROR));
    }
}
