use secrecy::SecretString;
use serde::Deserialize;

/// Path that selects a private in-memory database instead of a file.
pub const IN_MEMORY_DB_PATH: &str = ":memory:";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,
    pub max_connections: Option<u32>,
    /// Secrets the barrier derives its unseal keys from. The first one seals
    /// new root keys, every one of them can open existing root keys.
    #[serde(default)]
    pub unseal_secrets: Vec<SecretString>,
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("KEYPOOL_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> &str {
        self.db_path
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("keypool.db")
    }

    pub fn in_memory(&self) -> bool {
        self.db_path() == IN_MEMORY_DB_PATH
    }

    pub fn max_connections(&self) -> u32 {
        if self.in_memory() {
            // every connection to :memory: is a separate database
            return 1;
        }
        self.max_connections.unwrap_or(5).max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            max_connections: None,
            unseal_secrets: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.db_path(), "keypool.db");
        assert!(!config.in_memory());
        assert_eq!(config.max_connections(), 5);
    }

    #[test]
    fn in_memory_uses_a_single_connection() {
        let config = Config {
            db_path: Some(IN_MEMORY_DB_PATH.to_owned()),
            max_connections: Some(8),
            ..Default::default()
        };
        assert!(config.in_memory());
        assert_eq!(config.max_connections(), 1);
    }
}
