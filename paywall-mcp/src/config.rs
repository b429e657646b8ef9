//! MCP server configuration: TOML file plus environment overrides.
//!
//! Mirrors the facilitator's own config loader: `$VAR`/`${VAR}` patterns in
//! the raw TOML are expanded from the environment before parsing, and
//! `HOST`/`PORT` env vars override the parsed values afterward.

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

/// Configuration for one running [`crate::server::McpServerManager`].
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    /// The agent id protected calls are billed against.
    pub agent_id: String,
    /// The MCP server name used to build logical URLs.
    pub server_name: String,
    /// Bind address. Defaults to `0.0.0.0`.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Bind port. Defaults to `4020`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL of the facilitator backend.
    pub facilitator_base_url: String,
}

const fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    4020
}

/// Errors raised while loading an [`McpServerConfig`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The expanded TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl McpServerConfig {
    /// Loads configuration from the path named by the `CONFIG` env var,
    /// defaulting to `config.toml`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read, or if
    /// the expanded contents are not valid TOML for this shape.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read, or if
    /// the expanded contents are not valid TOML for this shape.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.to_owned(), source })?
        } else {
            String::new()
        };

        let expanded = expand_env_vars(&content);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment
/// variables. Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' {
            let braced = chars.peek() == Some(&'{');
            if braced {
                chars.next();
            }

            let mut var_name = String::new();
            while let Some(&c) = chars.peek() {
                if braced {
                    if c == '}' {
                        chars.next();
                        break;
                    }
                } else if !c.is_ascii_alphanumeric() && c != '_' {
                    break;
                }
                var_name.push(c);
                chars.next();
            }

            if var_name.is_empty() {
                result.push('$');
                if braced {
                    result.push('{');
                }
            } else if let Ok(val) = std::env::var(&var_name) {
                result.push_str(&val);
            } else {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&var_name);
                if braced {
                    result.push('}');
                }
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_missing_file_uses_env_overrides() {
        // SAFETY: test runs single-threaded within this process's env.
        unsafe {
            std::env::set_var("MCP_TEST_AGENT", "did:nv:agent");
        }
        let toml = "agent_id = \"$MCP_TEST_AGENT\"\nserver_name = \"srv\"\nfacilitator_base_url = \"http://localhost:4021\"\n";
        let path = std::env::temp_dir().join("paywall_mcp_config_test.toml");
        std::fs::write(&path, toml).unwrap();

        let config = McpServerConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.agent_id, "did:nv:agent");
        assert_eq!(config.port, 4020);

        std::fs::remove_file(&path).ok();
        // SAFETY: test runs single-threaded within this process's env.
        unsafe {
            std::env::remove_var("MCP_TEST_AGENT");
        }
    }

    #[test]
    fn expand_env_vars_leaves_unresolved_as_is() {
        assert_eq!(expand_env_vars("$DOES_NOT_EXIST_XYZ"), "$DOES_NOT_EXIST_XYZ");
    }
}
