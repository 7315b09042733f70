//! Per-family SQL syntax strategy.
//!
//! Statements are written with colon-format named parameters (`:name`).
//! MySQL and SQLite drivers bind those natively; SQL Server and the ODBC
//! bridge take positional placeholders, so their statements are rewritten
//! here, producing the placeholder text plus the bind values in placeholder
//! order.

use crate::descriptor::BackendFamily;
use crate::error::{DbiError, Result};
use crate::value::{Params, SqlValue};

/// SQL syntax strategy for one backend family.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    family: BackendFamily,
}

impl Dialect {
    pub fn new(family: BackendFamily) -> Self {
        Self { family }
    }

    /// Quote an identifier (table name, column name, database name).
    pub fn quote_ident(&self, name: &str) -> String {
        match self.family {
            // MSSQL uses square brackets; doubled closing brackets escape.
            BackendFamily::Mssql => format!("[{}]", name.replace(']', "]]")),
            BackendFamily::Mysql => format!("`{}`", name.replace('`', "``")),
            BackendFamily::Oracle | BackendFamily::Sqlite => {
                format!("\"{}\"", name.replace('"', "\"\""))
            }
        }
    }

    /// Positional parameter placeholder for the given 1-based index.
    pub fn param_placeholder(&self, index: usize) -> String {
        match self.family {
            BackendFamily::Mssql => format!("@P{}", index),
            _ => "?".to_string(),
        }
    }

    /// Build a procedure invocation statement with colon-format parameters.
    pub fn procedure_call(&self, proc: &str, paramnames: &[String]) -> String {
        let bindings: Vec<String> = paramnames.iter().map(|n| format!(":{}", n)).collect();
        match self.family {
            BackendFamily::Mssql => format!("EXEC {} {}", proc, bindings.join(", ")),
            _ => format!("CALL {}({})", proc, bindings.join(", ")),
        }
    }

    /// Rewrite colon-format named parameters into positional placeholders.
    ///
    /// Returns the rewritten statement plus the bind values in placeholder
    /// order. Parameter markers inside string literals and quoted
    /// identifiers are left untouched; `::` never starts a marker.
    ///
    /// # Errors
    ///
    /// [`DbiError::Parameter`] when the statement references a name absent
    /// from `params`.
    pub fn rewrite_named(&self, stmt: &str, params: &Params) -> Result<(String, Vec<SqlValue>)> {
        let mut sql = String::with_capacity(stmt.len());
        let mut values = Vec::new();
        let mut chars = stmt.char_indices().peekable();
        let mut index = 0usize;

        while let Some((pos, ch)) = chars.next() {
            match ch {
                // String literal: copy through to the closing quote.
                '\'' => {
                    sql.push(ch);
                    for (_, c) in chars.by_ref() {
                        sql.push(c);
                        if c == '\'' {
                            break;
                        }
                    }
                }
                // Quoted identifiers, per-family opener.
                '"' | '`' | '[' => {
                    let closer = match ch {
                        '[' => ']',
                        other => other,
                    };
                    sql.push(ch);
                    for (_, c) in chars.by_ref() {
                        sql.push(c);
                        if c == closer {
                            break;
                        }
                    }
                }
                ':' => {
                    if matches!(chars.peek(), Some((_, ':'))) {
                        // '::' is never a parameter marker.
                        sql.push(':');
                        sql.push(':');
                        chars.next();
                        continue;
                    }
                    let start = pos + 1;
                    let mut end = start;
                    while let Some((p, c)) = chars.peek().copied() {
                        if c.is_alphanumeric() || c == '_' {
                            end = p + c.len_utf8();
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if end == start {
                        sql.push(':');
                        continue;
                    }
                    let name = &stmt[start..end];
                    let value = params.get(name).ok_or_else(|| {
                        DbiError::Parameter(format!("no binding supplied for parameter ':{}'", name))
                    })?;
                    index += 1;
                    sql.push_str(&self.param_placeholder(index));
                    values.push(value.clone());
                }
                _ => sql.push(ch),
            }
        }

        Ok((sql, values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_quote_ident_per_family() {
        assert_eq!(Dialect::new(BackendFamily::Mssql).quote_ident("guitars"), "[guitars]");
        assert_eq!(Dialect::new(BackendFamily::Mssql).quote_ident("a]b"), "[a]]b]");
        assert_eq!(Dialect::new(BackendFamily::Mysql).quote_ident("guitars"), "`guitars`");
        assert_eq!(Dialect::new(BackendFamily::Sqlite).quote_ident("guitars"), "\"guitars\"");
    }

    #[test]
    fn test_param_placeholder() {
        assert_eq!(Dialect::new(BackendFamily::Mssql).param_placeholder(2), "@P2");
        assert_eq!(Dialect::new(BackendFamily::Oracle).param_placeholder(2), "?");
    }

    #[test]
    fn test_procedure_call_syntax() {
        let names = vec!["colour".to_string(), "qty".to_string()];
        assert_eq!(
            Dialect::new(BackendFamily::Mssql).procedure_call("usp_update_guitars", &names),
            "EXEC usp_update_guitars :colour, :qty"
        );
        assert_eq!(
            Dialect::new(BackendFamily::Mysql).procedure_call("sp_get_guitars", &names),
            "CALL sp_get_guitars(:colour, :qty)"
        );
    }

    #[test]
    fn test_rewrite_named_mssql() {
        let d = Dialect::new(BackendFamily::Mssql);
        let p = params! { "colour" => "Black", "qty" => 3i64 };
        let (sql, values) = d
            .rewrite_named("select * from guitars where colour = :colour and qty > :qty", &p)
            .unwrap();
        assert_eq!(
            sql,
            "select * from guitars where colour = @P1 and qty > @P2"
        );
        assert_eq!(values[0], SqlValue::Text("Black".to_string()));
        assert_eq!(values[1], SqlValue::I64(3));
    }

    #[test]
    fn test_rewrite_skips_literals_and_idents() {
        let d = Dialect::new(BackendFamily::Mssql);
        let p = params! { "c" => 1i64 };
        let (sql, values) = d
            .rewrite_named("select ': not a param' from [t:t] where c = :c", &p)
            .unwrap();
        assert_eq!(sql, "select ': not a param' from [t:t] where c = @P1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_rewrite_repeated_marker_rebinds() {
        let d = Dialect::new(BackendFamily::Oracle);
        let p = params! { "v" => 5i64 };
        let (sql, values) = d.rewrite_named("select :v + :v from dual", &p).unwrap();
        assert_eq!(sql, "select ? + ? from dual");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_rewrite_missing_binding() {
        let d = Dialect::new(BackendFamily::Mssql);
        let err = d.rewrite_named("select :missing", &Params::new()).unwrap_err();
        assert!(matches!(err, DbiError::Parameter(_)));
    }

    #[test]
    fn test_rewrite_double_colon_passthrough() {
        let d = Dialect::new(BackendFamily::Mssql);
        let (sql, values) = d.rewrite_named("select x::text from t", &Params::new()).unwrap();
        assert_eq!(sql, "select x::text from t");
        assert!(values.is_empty());
    }
}
