use serde::Deserialize;
use shardgate_engine::{ConnectionMode, EngineOptions};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub proxy: ProxyConfig,
    pub sharding: ShardingConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    #[serde(default = "default_server_version")]
    pub server_version: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProxyMode {
    #[default]
    MemoryStrictly,
    ConnectionStrictly,
}

impl From<ProxyMode> for ConnectionMode {
    fn from(mode: ProxyMode) -> Self {
        match mode {
            ProxyMode::MemoryStrictly => ConnectionMode::MemoryStrictly,
            ProxyMode::ConnectionStrictly => ConnectionMode::ConnectionStrictly,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    #[serde(default)]
    pub mode: ProxyMode,
    pub worker_threads: usize,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShardingConfig {
    pub data_sources: Vec<String>,
    pub default_data_source: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TableRuleConfig {
    pub name: String,
    pub sharding_column: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuditConfig {
    pub enabled: bool,
}

fn default_server_version() -> String {
    "8.0.33-shardgate".to_string()
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("server.max_connections must be at least 1"));
        }
        if self.proxy.worker_threads == 0 {
            return Err(anyhow::anyhow!("proxy.worker_threads must be at least 1"));
        }
        if self.proxy.statement_timeout_ms == 0 {
            return Err(anyhow::anyhow!("proxy.statement_timeout_ms must be at least 1"));
        }
        if self.sharding.data_sources.is_empty() {
            return Err(anyhow::anyhow!("sharding.data_sources is empty"));
        }
        let mut seen = HashSet::new();
        for name in &self.sharding.data_sources {
            if !seen.insert(name.as_str()) {
                return Err(anyhow::anyhow!(format!("data source {name} is listed twice")));
            }
        }
        if let Some(default) = &self.sharding.default_data_source {
            if !seen.contains(default.as_str()) {
                return Err(anyhow::anyhow!(format!(
                    "default data source {default} is not in sharding.data_sources"
                )));
            }
        }
        for table in &self.sharding.tables {
            if table.sharding_column.trim().is_empty() {
                return Err(anyhow::anyhow!(format!(
                    "table {} has no sharding column",
                    table.name
                )));
            }
        }
        Ok(())
    }

    pub fn default_data_source(&self) -> &str {
        self.sharding
            .default_data_source
            .as_deref()
            .or_else(|| self.sharding.data_sources.first().map(String::as_str))
            .unwrap_or_default()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            mode: self.proxy.mode.into(),
            worker_threads: self.proxy.worker_threads,
            statement_timeout: Duration::from_millis(self.proxy.statement_timeout_ms),
        }
    }
}
