use std::env;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host (default: 0.0.0.0)
    pub host: String,
    /// Server port (default: 1234)
    pub port: u16,
    /// Remove a room's document once its last connection leaves
    /// (default: false - rooms persist with zero members)
    pub evict_idle_rooms: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "1234".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let evict_idle_rooms = match env::var("EVICT_IDLE_ROOMS") {
            Ok(value) => value
                .parse()
                .map_err(|_| ConfigError::InvalidEvictIdleRooms)?,
            Err(_) => false,
        };

        Ok(Config {
            host,
            port,
            evict_idle_rooms,
        })
    }

    /// Get the server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidEvictIdleRooms,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "Invalid PORT environment variable"),
            ConfigError::InvalidEvictIdleRooms => {
                write!(f, "Invalid EVICT_IDLE_ROOMS environment variable")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
