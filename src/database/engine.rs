use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Relational engines an admin or ODS connection string can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseEngine {
    SqlServer,
    PostgreSql,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Not supported DatabaseEngine \"{0}\". Supported engines: SqlServer, and PostgreSql.")]
pub struct UnsupportedEngine(pub String);

impl DatabaseEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseEngine::SqlServer => "SqlServer",
            DatabaseEngine::PostgreSql => "PostgreSql",
        }
    }
}

impl FromStr for DatabaseEngine {
    type Err = UnsupportedEngine;

    // Matching is case-insensitive, same as the configuration files in the field.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("SqlServer") {
            Ok(DatabaseEngine::SqlServer)
        } else if trimmed.eq_ignore_ascii_case("PostgreSql") {
            Ok(DatabaseEngine::PostgreSql)
        } else {
            Err(UnsupportedEngine(value.to_string()))
        }
    }
}

impl fmt::Display for DatabaseEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
