//! HTTP server configuration loaded from environment variables.

/// Server configuration.
///
/// All fields except the JWT public key have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0:8080`).
    pub addr: String,
    /// Per-request timeout in seconds (default: `10`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Allowed CORS origins, comma-separated. Empty means permissive.
    pub cors_origins: Vec<String>,
    /// PEM-encoded RSA public key used to verify bearer tokens.
    pub jwt_public_key_pem: String,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// | Env Var                             | Required | Default        |
    /// |-------------------------------------|----------|----------------|
    /// | `LOOKOUT_HTTP_ADDR`                 | no       | `0.0.0.0:8080` |
    /// | `LOOKOUT_HTTP_REQUEST_TIMEOUT_SECS` | no       | `10`           |
    /// | `LOOKOUT_SHUTDOWN_TIMEOUT_SECS`     | no       | `10`           |
    /// | `LOOKOUT_CORS_ORIGINS`              | no       | (empty)        |
    /// | `LOOKOUT_JWT_PUBLIC_KEY_PEM`        | **yes**  | --             |
    ///
    /// # Panics
    ///
    /// Panics if `LOOKOUT_JWT_PUBLIC_KEY_PEM` is not set.
    pub fn from_env() -> Self {
        let addr =
            std::env::var("LOOKOUT_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

        let request_timeout_secs: u64 = std::env::var("LOOKOUT_HTTP_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("LOOKOUT_HTTP_REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("LOOKOUT_SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("LOOKOUT_SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let cors_origins: Vec<String> = std::env::var("LOOKOUT_CORS_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let jwt_public_key_pem = std::env::var("LOOKOUT_JWT_PUBLIC_KEY_PEM")
            .expect("LOOKOUT_JWT_PUBLIC_KEY_PEM must be set");

        Self {
            addr,
            request_timeout_secs,
            shutdown_timeout_secs,
            cors_origins,
            jwt_public_key_pem,
        }
    }
}
