//! Server configuration models.

use serde::{Deserialize, Serialize};

use crate::error::QdeskError;

/// Default port of the primary database.
pub const DEFAULT_KDB_PORT: u16 = 5000;

/// Default PostgreSQL port.
pub const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Kind of server a configuration points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    /// The primary, expression-evaluating database.
    #[default]
    Kdb,
    /// A relational server reached through the relational client.
    Postgres,
}

impl ServerKind {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kdb => "kdb",
            Self::Postgres => "postgres",
        }
    }

    /// Parse from string representation.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Self::Postgres,
            _ => Self::Kdb,
        }
    }

    /// Default port for this kind.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Kdb => DEFAULT_KDB_PORT,
            Self::Postgres => DEFAULT_POSTGRES_PORT,
        }
    }
}

/// Configuration for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name, unique per connection manager (1-255 chars)
    pub name: String,
    /// Server hostname or IP
    pub host: String,
    /// Server port
    pub port: u16,
    /// Login username
    pub username: String,
    /// Login password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Database name (relational servers only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Server kind
    #[serde(default)]
    pub kind: ServerKind,
    /// UI accent color (hex format, e.g., "#FF5733")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ServerConfig {
    /// Create a configuration for a primary server.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            username: String::new(),
            password: None,
            database: None,
            kind: ServerKind::Kdb,
            color: None,
        }
    }

    /// Create a builder for complex configurations.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Check whether this is a primary server.
    pub fn is_kdb(&self) -> bool {
        self.kind == ServerKind::Kdb
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), QdeskError> {
        if self.name.is_empty() || self.name.len() > 255 {
            return Err(QdeskError::config("Name must be 1-255 characters"));
        }
        if self.host.is_empty() {
            return Err(QdeskError::config("Host is required"));
        }
        if self.port == 0 {
            return Err(QdeskError::config("Port must be non-zero"));
        }
        if self.kind == ServerKind::Postgres && self.database.as_deref().unwrap_or("").is_empty() {
            return Err(QdeskError::config("Database is required for PostgreSQL servers"));
        }
        if let Some(ref color) = self.color {
            if !color.starts_with('#') || color.len() != 7 {
                return Err(QdeskError::config("Color must be in hex format (#RRGGBB)"));
            }
        }
        Ok(())
    }

    /// Get the display connection string (without password).
    pub fn display_url(&self) -> String {
        let user = if self.username.is_empty() {
            String::new()
        } else {
            format!("{}@", self.username)
        };
        match self.kind {
            ServerKind::Kdb => format!("kdb://{}{}:{}", user, self.host, self.port),
            ServerKind::Postgres => format!(
                "postgresql://{}{}:{}/{}",
                user,
                self.host,
                self.port,
                self.database.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Builder for ServerConfig.
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    name: Option<String>,
    host: Option<String>,
    port: u16,
    username: String,
    password: Option<String>,
    database: Option<String>,
    kind: ServerKind,
    color: Option<String>,
}

impl ServerConfigBuilder {
    /// Set the server name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the server kind.
    pub fn kind(mut self, kind: ServerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the UI color.
    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ServerConfig, QdeskError> {
        let config = ServerConfig {
            name: self.name.ok_or_else(|| QdeskError::config("Name is required"))?,
            host: self.host.ok_or_else(|| QdeskError::config("Host is required"))?,
            port: if self.port == 0 { self.kind.default_port() } else { self.port },
            username: self.username,
            password: self.password,
            database: self.database,
            kind: self.kind,
            color: self.color,
        };
        config.validate()?;
        Ok(config)
    }
}
