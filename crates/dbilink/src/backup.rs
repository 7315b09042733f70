//! Backup workflow outcome types.
//!
//! The backup-and-verify workflow itself is a SQL Server operation (see
//! [`backends::mssql`](crate::backends)); the exit-code taxonomy and the
//! stage-collapse logic live here so they can be reasoned about and tested
//! without a live server.

use std::fmt;

/// Prefix prepended to the current database name to derive the backup
/// database name. Deliberately non-guessable, so an interactive tool's
/// click-selection cannot land on it by accident.
pub const BACKUP_DB_PREFIX: &str = "__bak__";

/// Derive the backup database name for a source database.
pub fn backup_database_name(database: &str) -> String {
    format!("{}{}", BACKUP_DB_PREFIX, database)
}

/// Enumerated outcome of the backup workflow.
///
/// The discriminants double as program exit codes for callers that shell
/// out to a backup job. Never mutated after assignment; returned by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// All stages succeeded.
    Ok = 0,
    /// Source table does not exist.
    ErrBkupTbnex = 110,
    /// Backup database does not exist.
    ErrBkupDbnex = 111,
    /// Source and backup checksums differ.
    ErrBkupCksum = 112,
}

impl ExitCode {
    /// Numeric exit code.
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// True only for the fully successful outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self, ExitCode::Ok)
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExitCode::Ok => "OK",
            ExitCode::ErrBkupTbnex => "ERR_BKUP_TBNEX",
            ExitCode::ErrBkupDbnex => "ERR_BKUP_DBNEX",
            ExitCode::ErrBkupCksum => "ERR_BKUP_CKSUM",
        };
        write!(f, "{}", name)
    }
}

/// Stage results of one backup run, collapsed into an [`ExitCode`].
///
/// The workflow is sequential and short-circuits: a failed stage leaves
/// the later flags false.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupOutcome {
    /// TABLE_CHECK: the source table exists.
    pub table_exists: bool,
    /// BACKUP_DB_CHECK: the backup database exists.
    pub backup_db_exists: bool,
    /// COPY_AND_VERIFY: source and copy checksums match.
    pub checksum_match: bool,
}

impl BackupOutcome {
    /// Collapse the stage flags into the exit code, first failure wins.
    pub fn exit_code(&self) -> ExitCode {
        if !self.table_exists {
            return ExitCode::ErrBkupTbnex;
        }
        if !self.backup_db_exists {
            return ExitCode::ErrBkupDbnex;
        }
        if !self.checksum_match {
            return ExitCode::ErrBkupCksum;
        }
        ExitCode::Ok
    }

    /// True when every stage succeeded.
    pub fn success(&self) -> bool {
        self.table_exists && self.backup_db_exists && self.checksum_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(ExitCode::Ok.code(), 0);
        assert_eq!(ExitCode::ErrBkupTbnex.code(), 110);
        assert_eq!(ExitCode::ErrBkupDbnex.code(), 111);
        assert_eq!(ExitCode::ErrBkupCksum.code(), 112);
    }

    #[test]
    fn test_backup_database_name() {
        assert_eq!(backup_database_name("stores"), "__bak__stores");
    }

    #[test]
    fn test_outcome_collapse_order() {
        let outcome = BackupOutcome::default();
        assert_eq!(outcome.exit_code(), ExitCode::ErrBkupTbnex);

        let outcome = BackupOutcome {
            table_exists: true,
            ..Default::default()
        };
        assert_eq!(outcome.exit_code(), ExitCode::ErrBkupDbnex);

        let outcome = BackupOutcome {
            table_exists: true,
            backup_db_exists: true,
            checksum_match: false,
        };
        assert_eq!(outcome.exit_code(), ExitCode::ErrBkupCksum);

        let outcome = BackupOutcome {
            table_exists: true,
            backup_db_exists: true,
            checksum_match: true,
        };
        assert_eq!(outcome.exit_code(), ExitCode::Ok);
        assert!(outcome.success());
    }
}
