//! Server configuration from environment variables.

use std::path::PathBuf;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub output_root: PathBuf,
    /// Prompt template directory; built-in templates back anything missing.
    pub prompts_dir: Option<PathBuf>,
    /// Retrieval corpus directory; absent means an empty corpus.
    pub corpus_dir: Option<PathBuf>,
    /// Default provider when a request does not name one.
    pub use_real_lm: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            output_root: "output".into(),
            prompts_dir: Some("prompts".into()),
            corpus_dir: Some("rag_docs".into()),
            use_real_lm: false,
        }
    }
}

impl ServerConfig {
    /// Reads `BACKEND_HOST`, `BACKEND_PORT`, `OUTPUT_DIR`, and `USE_REAL_LM`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("BACKEND_HOST") {
            if !host.is_empty() {
                config.host = host;
            }
        }
        if let Some(port) = std::env::var("BACKEND_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }
        if let Ok(dir) = std::env::var("OUTPUT_DIR") {
            if !dir.is_empty() {
                config.output_root = dir.into();
            }
        }
        config.use_real_lm = matches!(
            std::env::var("USE_REAL_LM").as_deref(),
            Ok("1") | Ok("true") | Ok("True")
        );
        config
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local_and_mock() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert!(!config.use_real_lm);
    }
}
