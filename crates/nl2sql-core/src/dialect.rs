//! SQL dialect catalogue: identifiers accepted in configuration and the
//! per-dialect facts the dialect normalizer needs.
use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    SQLiteDialect, SnowflakeDialect,
};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Generic,
    Postgres,
    MySql,
    Sqlite,
    MsSql,
    BigQuery,
    Snowflake,
}

impl SqlDialect {
    pub const ALL: [SqlDialect; 7] = [
        Self::Generic,
        Self::Postgres,
        Self::MySql,
        Self::Sqlite,
        Self::MsSql,
        Self::BigQuery,
        Self::Snowflake,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
            Self::MsSql => "mssql",
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
        }
    }

    /// Parser dialect used to read SQL written for this database.
    pub fn parser(&self) -> Box<dyn Dialect> {
        match self {
            Self::Generic => Box::new(GenericDialect {}),
            Self::Postgres => Box::new(PostgreSqlDialect {}),
            Self::MySql => Box::new(MySqlDialect {}),
            Self::Sqlite => Box::new(SQLiteDialect {}),
            Self::MsSql => Box::new(MsSqlDialect {}),
            Self::BigQuery => Box::new(BigQueryDialect {}),
            Self::Snowflake => Box::new(SnowflakeDialect {}),
        }
    }

    /// Opening quote for delimited identifiers.
    pub fn identifier_quote(&self) -> char {
        match self {
            Self::MySql | Self::BigQuery => '`',
            Self::MsSql => '[',
            _ => '"',
        }
    }

    pub fn supports_limit(&self) -> bool {
        !matches!(self, Self::MsSql)
    }

    pub fn supports_ilike(&self) -> bool {
        matches!(self, Self::Generic | Self::Postgres | Self::Snowflake)
    }

    /// Function names rewritten when targeting this dialect, upper-case.
    pub fn function_renames(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Generic => &[],
            Self::Postgres => &[("IFNULL", "COALESCE"), ("NVL", "COALESCE"), ("LEN", "LENGTH")],
            Self::MySql => &[("NVL", "IFNULL"), ("LEN", "LENGTH")],
            Self::Sqlite => &[("NVL", "IFNULL"), ("LEN", "LENGTH")],
            Self::MsSql => &[("IFNULL", "ISNULL"), ("NVL", "ISNULL"), ("LENGTH", "LEN")],
            Self::BigQuery => &[("NVL", "IFNULL"), ("LEN", "LENGTH")],
            Self::Snowflake => &[("LEN", "LENGTH")],
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SqlDialect {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generic" | "ansi" => Ok(Self::Generic),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlite" => Ok(Self::Sqlite),
            "mssql" | "tsql" | "sqlserver" => Ok(Self::MsSql),
            "bigquery" => Ok(Self::BigQuery),
            "snowflake" => Ok(Self::Snowflake),
            other => Err(PipelineError::InvalidConfiguration(format!(
                "unknown SQL dialect '{}'",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases() {
        assert_eq!("PostgreSQL".parse::<SqlDialect>().unwrap(), SqlDialect::Postgres);
        assert_eq!("tsql".parse::<SqlDialect>().unwrap(), SqlDialect::MsSql);
        assert!("oracle".parse::<SqlDialect>().is_err());
    }

    #[test]
    fn names_round_trip() {
        for dialect in SqlDialect::ALL {
            assert_eq!(dialect.name().parse::<SqlDialect>().unwrap(), dialect);
        }
    }
}
