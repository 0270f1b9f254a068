// letsee-backup/src/backup/credentials.rs
use std::fmt;
use url::Url;

use crate::errors::Result;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_USER: &str = "postgres";

/// Connection parameters handed to the pg client programs for a single run.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl DatabaseCredentials {
    /// Parses a connection URI such as `postgresql+psycopg://user:pw@db:5432/letsee`.
    ///
    /// Missing components fall back to `localhost`, `5432`, `postgres` and an empty
    /// password. A string that is not a URI at all is an error.
    pub fn from_url(database_url: &str) -> Result<Self> {
        let parsed = Url::parse(database_url)?;

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_HOST)
            .to_string();
        let user = match parsed.username() {
            "" => DEFAULT_USER.to_string(),
            name => name.to_string(),
        };

        Ok(DatabaseCredentials {
            host,
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            database: parsed.path().trim_start_matches('/').to_string(),
            user,
            password: parsed.password().unwrap_or("").to_string(),
        })
    }
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}
