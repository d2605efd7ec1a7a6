//! Database handle configuration.

/// Configuration for opening databases.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether a handle closes itself when another caller asks to upgrade
    /// or delete its database.
    pub close_on_version_change: bool,

    /// Whether to check that the migration table has no gaps before opening.
    pub validate_migrations: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            close_on_version_change: false,
            validate_migrations: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether handles close themselves on a version change request.
    #[must_use]
    pub const fn close_on_version_change(mut self, value: bool) -> Self {
        self.close_on_version_change = value;
        self
    }

    /// Sets whether migrations are validated before opening.
    #[must_use]
    pub const fn validate_migrations(mut self, value: bool) -> Self {
        self.validate_migrations = value;
        self
    }
}
