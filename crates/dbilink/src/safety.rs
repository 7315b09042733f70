//! Statement safety filter.
//!
//! A cursory syntactic check for injection attempts, not a parser-based
//! defense. Parametrized single-statement execution never needs more than
//! one statement separator, and never needs an inline comment; both are
//! common vehicles for statement smuggling and payload truncation.
//!
//! Callers who must run scripts with legitimate multiple statements (e.g.
//! schema setup) can bypass the filter with
//! [`QueryOptions::ignore_unsafe`](crate::backends::QueryOptions), taking
//! responsibility for the statement's content.

use tracing::warn;

use crate::error::{DbiError, Result};

/// Check a statement against the injection heuristics.
///
/// A single `;` terminating a normal statement is legal; only a second
/// separator trips the filter. Any `--` sequence trips it.
///
/// # Errors
///
/// Returns [`DbiError::InjectionSuspected`] when the statement contains
/// more than one `;`, or an inline comment delimiter (`--`). The rejection
/// is logged to the operator channel before the error is returned.
pub fn check(stmt: &str) -> Result<()> {
    if stmt.matches(';').count() > 1 {
        let reason = "multiple statements are disallowed for security reasons";
        warn!(statement = stmt, "{}", reason);
        return Err(DbiError::InjectionSuspected { reason });
    }
    if stmt.contains("--") {
        let reason = "comments are not allowed in the statement for security reasons";
        warn!(statement = stmt, "{}", reason);
        return Err(DbiError::InjectionSuspected { reason });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_statement_passes() {
        assert!(check("select count(*) from guitars where colour = :colour").is_ok());
    }

    #[test]
    fn test_single_terminator_passes() {
        assert!(check("select 1;").is_ok());
    }

    #[test]
    fn test_multiple_separators_rejected() {
        let err = check("select 1; drop table guitars;").unwrap_err();
        assert!(err.is_injection_suspected());
    }

    #[test]
    fn test_comment_delimiter_rejected() {
        let err = check("select * from users where name = 'x' --' and 1=1").unwrap_err();
        assert!(err.is_injection_suspected());
    }

    #[test]
    fn test_comment_anywhere_rejected() {
        assert!(check("-- leading comment\nselect 1").is_err());
    }
}
