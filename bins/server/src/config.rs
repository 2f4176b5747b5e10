use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use viewer_api::{BrokerEndpoint, BrokerProtocol};
use viewer_engine::{ConnectionConfig, ViewerConfig};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "topic-viewer-server", about = "Просмотр MQTT topic'ов в реальном времени")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Подключиться к брокеру и поднять HTTP + WS API
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Subscription filter (перекрывает `[viewer].filter`)
    #[arg(long)]
    pub filter: Option<String>,

    /// Порт API (перекрывает `api_port`)
    #[arg(long)]
    pub api_port: Option<u16>,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Очередь исходящих событий на одно WS соединение.
    #[serde(default = "default_ws_buffer")]
    pub ws_buffer: usize,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub viewer: ViewerConfig,
}

fn default_api_port() -> u16 {
    8080
}
fn default_ws_buffer() -> usize {
    1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            ws_buffer: default_ws_buffer(),
            broker: BrokerConfig::default(),
            connection: ConnectionConfig::default(),
            viewer: ViewerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_tls")]
    pub tls: bool,
    /// "tcp" или "ws"
    #[serde(default)]
    pub transport: BrokerProtocol,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    8883
}
fn default_tls() -> bool {
    true
}
fn default_ws_path() -> String {
    "/mqtt".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_max_packet_size() -> usize {
    10 * 1024 * 1024
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: default_tls(),
            transport: BrokerProtocol::default(),
            ws_path: default_ws_path(),
            keep_alive_secs: default_keep_alive_secs(),
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl BrokerConfig {
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ServerError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ServerError::Config {
                context: "broker",
                detail: "host must not be empty".into(),
            });
        }
        if self.max_packet_size == 0 {
            return Err(ServerError::Config {
                context: "broker",
                detail: "max_packet_size must be > 0".into(),
            });
        }
        let ws_path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };
        Ok(BrokerEndpoint {
            host: host.to_string(),
            port: self.port,
            tls: self.tls,
            protocol: self.transport,
            ws_path,
            keep_alive_secs: self.keep_alive_secs,
            max_packet_size: self.max_packet_size,
        })
    }
}

impl ServerConfig {
    /// Отсутствующий файл — конфиг по умолчанию.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(%path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") });
            }
        };
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Применить переопределения из командной строки.
    pub fn apply_args(&mut self, args: &ServeArgs) {
        if let Some(filter) = &args.filter {
            self.viewer.filter = Some(filter.clone());
        }
        if let Some(port) = args.api_port {
            self.api_port = port;
        }
    }
}
