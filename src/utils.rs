// ABOUTME: Utility functions for identifier validation and quoting
// ABOUTME: Provides SQL identifier/literal quoting, shell quoting and home-directory expansion

use crate::error::SyncError;
use std::path::{Path, PathBuf};

/// Validate a SQLite identifier (table or column name) received from config or a remote.
///
/// Only letters, digits and underscores are accepted, and the first character must
/// be a letter or underscore. Remote column names flow into generated INSERT
/// statements, so anything else is rejected rather than escaped.
///
/// # Examples
///
/// ```
/// # use signal_mirror::utils::validate_identifier;
/// assert!(validate_identifier("signals_received").is_ok());
/// assert!(validate_identifier("_private").is_ok());
/// assert!(validate_identifier("123table").is_err());
/// assert!(validate_identifier("id\"; DROP TABLE x; --").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<(), SyncError> {
    let mut chars = identifier.chars();
    let first = chars
        .next()
        .ok_or_else(|| SyncError::Parse("identifier cannot be empty".to_string()))?;

    if identifier.len() > 128 {
        return Err(SyncError::Parse(format!(
            "identifier '{}' exceeds 128 characters",
            sanitize_identifier(identifier)
        )));
    }

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(SyncError::Parse(format!(
            "identifier '{}' must start with a letter or underscore",
            sanitize_identifier(identifier)
        )));
    }

    if let Some(bad) = chars.find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(SyncError::Parse(format!(
            "identifier '{}' contains invalid character {:?}",
            sanitize_identifier(identifier),
            bad
        )));
    }

    Ok(())
}

/// Strip control characters and cap length so identifiers are safe to log.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a SQLite identifier (table, column)
///
/// Assumes the identifier has already been validated. Escapes embedded quotes
/// and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote a SQL string literal (for use in SQL statements)
///
/// # Examples
///
/// ```
/// use signal_mirror::utils::quote_literal;
/// assert_eq!(quote_literal("2024-01-05"), "'2024-01-05'");
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// ```
pub fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push('\'');
        }
        quoted.push(ch);
    }
    quoted.push('\'');
    quoted
}

/// Quote a single argument for a POSIX shell.
///
/// The remote side of an SSH session re-parses the command line with the login
/// shell, so every argument is wrapped in single quotes and embedded single
/// quotes are closed, escaped and reopened.
///
/// # Examples
///
/// ```
/// use signal_mirror::utils::shell_quote;
/// assert_eq!(shell_quote("plain"), "'plain'");
/// assert_eq!(shell_quote("date > '2024-01-05'"), r#"'date > '\''2024-01-05'\'''"#);
/// ```
pub fn shell_quote(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// Expand a leading `~/` to the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
