use secrecy::SecretString;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// The Gemini Live bidirectional streaming endpoint, without the key.
pub const DEFAULT_GEMINI_WS_URL: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Where tool calls issued by the model are executed.
#[derive(Clone, Debug)]
pub enum ToolProvider {
    /// Tool calls are answered with an error outcome.
    None,
    /// A REST tool service.
    Http {
        base_url: String,
        api_key: Option<SecretString>,
    },
    /// An MCP server spawned as a child process.
    Mcp { program: String, args: Vec<String> },
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: SecretString,
    pub gemini_ws_url: String,
    pub gemini_model: String,
    pub log_level: Level,
    pub tool_provider: ToolProvider,
    pub handshake_timeout: Duration,
    /// `None` disables the upstream idle timeout.
    pub upstream_idle_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map(SecretString::from)
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let gemini_ws_url =
            std::env::var("GEMINI_WS_URL").unwrap_or_else(|_| DEFAULT_GEMINI_WS_URL.to_string());
        let gemini_model = std::env::var("GEMINI_MODEL")
            .unwrap_or_else(|_| liverelay_core::session_config::DEFAULT_MODEL.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let tool_provider = tool_provider_from_env()?;

        let handshake_timeout = match secs_from_env("HANDSHAKE_TIMEOUT_SECS", 15)? {
            0 => {
                return Err(ConfigError::InvalidValue(
                    "HANDSHAKE_TIMEOUT_SECS".to_string(),
                    "must be greater than zero".to_string(),
                ));
            }
            secs => Duration::from_secs(secs),
        };
        let upstream_idle_timeout = match secs_from_env("UPSTREAM_IDLE_TIMEOUT_SECS", 0)? {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_ws_url,
            gemini_model,
            log_level,
            tool_provider,
            handshake_timeout,
            upstream_idle_timeout,
        })
    }
}

fn tool_provider_from_env() -> Result<ToolProvider, ConfigError> {
    let provider_str = std::env::var("TOOL_PROVIDER").unwrap_or_else(|_| "none".to_string());
    match provider_str.to_lowercase().as_str() {
        "none" => Ok(ToolProvider::None),
        "http" => {
            let base_url = std::env::var("TOOL_SERVICE_URL").map_err(|_| {
                ConfigError::MissingVar(
                    "TOOL_SERVICE_URL must be set for 'http' tool provider".to_string(),
                )
            })?;
            let api_key = std::env::var("TOOL_SERVICE_API_KEY")
                .ok()
                .map(SecretString::from);
            Ok(ToolProvider::Http { base_url, api_key })
        }
        "mcp" => {
            let command = std::env::var("MCP_SERVER_COMMAND").map_err(|_| {
                ConfigError::MissingVar(
                    "MCP_SERVER_COMMAND must be set for 'mcp' tool provider".to_string(),
                )
            })?;
            let mut parts = command.split_whitespace().map(str::to_string);
            let program = parts.next().ok_or_else(|| {
                ConfigError::InvalidValue(
                    "MCP_SERVER_COMMAND".to_string(),
                    "command is empty".to_string(),
                )
            })?;
            Ok(ToolProvider::Mcp {
                program,
                args: parts.collect(),
            })
        }
        other => Err(ConfigError::InvalidValue(
            "TOOL_PROVIDER".to_string(),
            format!("'{}' is not one of none, http, mcp", other),
        )),
    }
}

fn secs_from_env(var: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse::<u64>().map_err(|_| {
            ConfigError::InvalidValue(
                var.to_string(),
                format!("'{}' is not a whole number of seconds", value),
            )
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("BIND_ADDRESS");
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_WS_URL");
            env::remove_var("GEMINI_MODEL");
            env::remove_var("RUST_LOG");
            env::remove_var("TOOL_PROVIDER");
            env::remove_var("TOOL_SERVICE_URL");
            env::remove_var("TOOL_SERVICE_API_KEY");
            env::remove_var("MCP_SERVER_COMMAND");
            env::remove_var("HANDSHAKE_TIMEOUT_SECS");
            env::remove_var("UPSTREAM_IDLE_TIMEOUT_SECS");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:8000");
        assert_eq!(config.gemini_api_key.expose_secret(), "test-gemini-key");
        assert_eq!(config.gemini_ws_url, DEFAULT_GEMINI_WS_URL);
        assert_eq!(config.gemini_model, "gemini-2.0-flash-exp");
        assert_eq!(config.log_level, Level::INFO);
        assert!(matches!(config.tool_provider, ToolProvider::None));
        assert_eq!(config.handshake_timeout, Duration::from_secs(15));
        assert_eq!(config.upstream_idle_timeout, None);
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:9000");
            env::set_var("GEMINI_API_KEY", "custom-key");
            env::set_var("GEMINI_WS_URL", "ws://localhost:9999/live");
            env::set_var("GEMINI_MODEL", "gemini-live-test");
            env::set_var("RUST_LOG", "debug");
            env::set_var("TOOL_PROVIDER", "HTTP");
            env::set_var("TOOL_SERVICE_URL", "http://tools.local/api");
            env::set_var("TOOL_SERVICE_API_KEY", "tool-key");
            env::set_var("HANDSHAKE_TIMEOUT_SECS", "5");
            env::set_var("UPSTREAM_IDLE_TIMEOUT_SECS", "120");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:9000");
        assert_eq!(config.gemini_ws_url, "ws://localhost:9999/live");
        assert_eq!(config.gemini_model, "gemini-live-test");
        assert_eq!(config.log_level, Level::DEBUG);
        match config.tool_provider {
            ToolProvider::Http { base_url, api_key } => {
                assert_eq!(base_url, "http://tools.local/api");
                assert_eq!(api_key.unwrap().expose_secret(), "tool-key");
            }
            other => panic!("Expected Http tool provider, got {:?}", other),
        }
        assert_eq!(config.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.upstream_idle_timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    #[serial]
    fn test_config_mcp_provider_splits_command() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("TOOL_PROVIDER", "mcp");
            env::set_var("MCP_SERVER_COMMAND", "npx -y @acme/tools-server");
        }

        let config = Config::from_env().expect("Config should load successfully");
        match config.tool_provider {
            ToolProvider::Mcp { program, args } => {
                assert_eq!(program, "npx");
                assert_eq!(args, vec!["-y", "@acme/tools-server"]);
            }
            other => panic!("Expected Mcp tool provider, got {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_config_missing_gemini_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "GEMINI_API_KEY"),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_http_provider_requires_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("TOOL_PROVIDER", "http");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("TOOL_SERVICE_URL")),
            _ => panic!("Expected MissingVar for TOOL_SERVICE_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_unknown_tool_provider() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("TOOL_PROVIDER", "carrier-pigeon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "TOOL_PROVIDER"),
            _ => panic!("Expected InvalidValue for TOOL_PROVIDER"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_timeout() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("HANDSHAKE_TIMEOUT_SECS", "soon");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "HANDSHAKE_TIMEOUT_SECS"),
            _ => panic!("Expected InvalidValue for HANDSHAKE_TIMEOUT_SECS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_zero_handshake_timeout() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("HANDSHAKE_TIMEOUT_SECS", "0");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, reason) => {
                assert_eq!(var, "HANDSHAKE_TIMEOUT_SECS");
                assert!(reason.contains("greater than zero"));
            }
            _ => panic!("Expected InvalidValue for HANDSHAKE_TIMEOUT_SECS"),
        }
    }
}
