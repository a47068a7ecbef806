use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the agent to converse with.
pub const AGENT_ID_VAR: &str = "AGENT_ID";
/// Environment variable holding the speech-service API key.
pub const API_KEY_VAR: &str = "ELEVENLABS_API_KEY";

/// Top-level configuration loaded from asa-panel.toml.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PanelConfig {
    pub agent: AgentConfig,
    pub panel: ServeConfig,
}

/// How to launch the agent subprocess.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    /// Executable to run; resolved via PATH, never through a shell.
    pub command: String,
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: PathBuf,
    /// File capturing the agent's stdout and stderr, truncated on each start.
    pub log_file: PathBuf,
}

/// Where the panel listens and how often the page refreshes its status.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    pub poll_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["main.py".to_string()],
            working_dir: PathBuf::from("."),
            log_file: PathBuf::from("agent.log"),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            poll_interval_ms: 500,
        }
    }
}

/// Errors loading or parsing the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from the given path; a missing file means all defaults.
pub fn load_config(path: &Path) -> Result<PanelConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(PanelConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// The two opaque credential strings the agent needs.
///
/// The panel never interprets these; it only gates the start control on both
/// being present and non-empty.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub agent_id: String,
    pub api_key: String,
}

impl Credentials {
    /// Read credentials from the process environment. Unset variables load as
    /// empty strings so `is_complete` is the single validity check.
    pub fn from_env() -> Self {
        Self {
            agent_id: std::env::var(AGENT_ID_VAR).unwrap_or_default(),
            api_key: std::env::var(API_KEY_VAR).unwrap_or_default(),
        }
    }

    /// Both values present and non-empty.
    pub fn is_complete(&self) -> bool {
        !self.agent_id.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("asa-panel.toml")).unwrap();
        assert_eq!(config.agent.command, "python3");
        assert_eq!(config.agent.args, vec!["main.py"]);
        assert_eq!(config.panel.port, 8080);
        assert_eq!(config.panel.poll_interval_ms, 500);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asa-panel.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[agent]").unwrap();
        writeln!(f, "command = \"./asa-agent\"").unwrap();
        writeln!(f, "args = []").unwrap();
        drop(f);

        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.command, "./asa-agent");
        assert!(config.agent.args.is_empty());
        assert_eq!(config.panel.bind, "127.0.0.1");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("asa-panel.toml");
        std::fs::write(&path, "[agent\ncommand = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_credentials_complete() {
        let creds = Credentials {
            agent_id: "agent_123".to_string(),
            api_key: "sk_456".to_string(),
        };
        assert!(creds.is_complete());
    }

    #[test]
    fn test_credentials_incomplete() {
        let missing_key = Credentials {
            agent_id: "agent_123".to_string(),
            api_key: String::new(),
        };
        assert!(!missing_key.is_complete());

        let blank_id = Credentials {
            agent_id: "   ".to_string(),
            api_key: "sk_456".to_string(),
        };
        assert!(!blank_id.is_complete());
    }
}
