//! Configuration module for echo-client-demo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::echo::{EngineConfig, Transport};
use crate::logging::LogConfig;

/// Smallest per-worker buffer that still holds a full echo payload.
const MIN_BUFFER_SIZE: usize = 64;

/// Command-line arguments for the demo
#[derive(Parser, Debug)]
#[command(name = "echo-client-demo")]
#[command(author = "echo-client-demo authors")]
#[command(version = "0.1.0")]
#[command(about = "TCP/UDP echo-client workload demo", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Echo server address for both clients (IPv6 or IPv4 literal)
    #[arg(short = 's', long)]
    pub server: Option<String>,

    /// Number of TCP echo workers (0 disables the TCP client)
    #[arg(long)]
    pub tcp_workers: Option<usize>,

    /// Number of UDP echo workers (0 disables the UDP client)
    #[arg(long)]
    pub udp_workers: Option<usize>,

    /// Request/reply cycles per connection
    #[arg(short = 'n', long)]
    pub cycles: Option<u32>,

    /// Also run a local echo server on this address (e.g., 127.0.0.1:5050)
    #[arg(long)]
    pub serve: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default = "default_tcp_echo")]
    pub tcp_echo: EchoConfig,
    #[serde(default = "default_udp_echo")]
    pub udp_echo: EchoConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Number of messages the log queue holds before dropping
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,
    /// Longest formatted message, in bytes, including the line ending
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Stack size of the log consumer thread in bytes
    #[serde(default = "default_task_stack_size")]
    pub stack_size: usize,
    /// Nice value of the log consumer thread
    #[serde(default)]
    pub priority: i32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            queue_length: default_queue_length(),
            max_message_length: default_max_message_length(),
            stack_size: default_task_stack_size(),
            priority: 0,
        }
    }
}

/// Endpoint and bring-up configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Name this node answers to
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Endpoints to bring up (`[[network.endpoints]]`)
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,
    /// Interval between bring-up attempts for endpoints that are still down
    #[serde(default = "default_link_poll_interval")]
    pub link_poll_interval_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            endpoints: default_endpoints(),
            link_poll_interval_ms: default_link_poll_interval(),
        }
    }
}

/// One network endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    /// Address in `address/prefix` form
    pub address: String,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            gateway: None,
            dns_servers: Vec::new(),
        }
    }
}

/// One echo client workload (`[tcp_echo]` or `[udp_echo]`)
#[derive(Debug, Clone, Deserialize)]
pub struct EchoConfig {
    /// Number of worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Echo server address, IPv6 or IPv4 literal
    #[serde(default = "default_server")]
    pub server: String,
    /// Echo server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request/reply cycles per connection
    #[serde(default = "default_cycles")]
    pub cycles: u32,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Pause between connections
    #[serde(default = "default_loop_delay")]
    pub loop_delay_ms: u64,
    /// Maximum segment size used to size buffers
    #[serde(default = "default_mss")]
    pub mss: usize,
    /// Worker buffers are `mss * buffer_multiplier` bytes
    #[serde(default = "default_buffer_multiplier")]
    pub buffer_multiplier: usize,
    /// Socket send/receive buffer sizes are `mss * socket_buffer_segments`
    #[serde(default = "default_socket_buffer_segments")]
    pub socket_buffer_segments: usize,
    /// Stack size of each worker thread in bytes
    #[serde(default = "default_task_stack_size")]
    pub stack_size: usize,
    /// Nice value of each worker thread
    #[serde(default)]
    pub priority: i32,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            server: default_server(),
            port: default_port(),
            cycles: default_cycles(),
            receive_timeout_ms: default_receive_timeout(),
            send_timeout_ms: default_send_timeout(),
            loop_delay_ms: default_loop_delay(),
            mss: default_mss(),
            buffer_multiplier: default_buffer_multiplier(),
            socket_buffer_segments: default_socket_buffer_segments(),
            stack_size: default_task_stack_size(),
            priority: 0,
        }
    }
}

impl EchoConfig {
    /// Build the engine configuration for one transport.
    pub fn engine_config(&self, transport: Transport) -> EngineConfig {
        EngineConfig {
            transport,
            workers: self.workers,
            server: self.server.clone(),
            port: self.port,
            cycles: self.cycles,
            receive_timeout: Duration::from_millis(self.receive_timeout_ms),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            loop_delay: Duration::from_millis(self.loop_delay_ms),
            buffer_size: self.mss * self.buffer_multiplier,
            socket_buffer_size: self.mss * self.socket_buffer_segments,
            stack_size: self.stack_size,
            priority: self.priority,
        }
    }
}

/// Periodic counter report
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Seconds between worker counter reports (0 = never)
    #[serde(default = "default_report_interval")]
    pub interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_report_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_length() -> usize {
    100
}

fn default_max_message_length() -> usize {
    512
}

fn default_task_stack_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_hostname() -> String {
    "echo-demo".to_string()
}

fn default_endpoints() -> Vec<EndpointConfig> {
    vec![EndpointConfig::new("127.0.0.1/8"), EndpointConfig::new("::1/128")]
}

fn default_link_poll_interval() -> u64 {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_server() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5050
}

fn default_cycles() -> u32 {
    1000
}

fn default_receive_timeout() -> u64 {
    4000
}

fn default_send_timeout() -> u64 {
    2000
}

fn default_loop_delay() -> u64 {
    500
}

fn default_mss() -> usize {
    1460
}

fn default_buffer_multiplier() -> usize {
    3
}

fn default_socket_buffer_segments() -> usize {
    6
}

fn default_report_interval() -> u64 {
    10
}

fn default_tcp_echo() -> EchoConfig {
    EchoConfig::default()
}

fn default_udp_echo() -> EchoConfig {
    EchoConfig::default()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub logging: LoggingConfig,
    pub network: NetworkConfig,
    pub tcp_echo: EchoConfig,
    pub udp_echo: EchoConfig,
    pub report: ReportConfig,
    pub serve: Option<String>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let mut tcp_echo = toml_config.tcp_echo;
        let mut udp_echo = toml_config.udp_echo;

        if let Some(server) = cli.server {
            tcp_echo.server = server.clone();
            udp_echo.server = server;
        }
        if let Some(workers) = cli.tcp_workers {
            tcp_echo.workers = workers;
        }
        if let Some(workers) = cli.udp_workers {
            udp_echo.workers = workers;
        }
        if let Some(cycles) = cli.cycles {
            tcp_echo.cycles = cycles;
            udp_echo.cycles = cycles;
        }

        Config {
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level.clone()
            },
            logging: toml_config.logging,
            network: toml_config.network,
            tcp_echo,
            udp_echo,
            report: toml_config.report,
            serve: cli.serve,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.logging.queue_length == 0 {
            return Err(ConfigError::Invalid("logging.queue_length must be non-zero".into()));
        }
        // Room for at least one character plus the line ending.
        if self.logging.max_message_length < 2 {
            return Err(ConfigError::Invalid(
                "logging.max_message_length must be at least 2".into(),
            ));
        }
        if self.network.endpoints.is_empty() {
            return Err(ConfigError::Invalid("network.endpoints must not be empty".into()));
        }
        for (section, echo) in [("tcp_echo", &self.tcp_echo), ("udp_echo", &self.udp_echo)] {
            if echo.mss * echo.buffer_multiplier < MIN_BUFFER_SIZE {
                return Err(ConfigError::Invalid(format!(
                    "{section}: mss * buffer_multiplier must be at least {MIN_BUFFER_SIZE}"
                )));
            }
            if echo.receive_timeout_ms == 0 || echo.send_timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{section}: timeouts must be non-zero"
                )));
            }
        }
        Ok(())
    }

    /// Settings for the asynchronous log sink.
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            queue_length: self.logging.queue_length,
            max_message_length: self.logging.max_message_length,
            stack_size: self.logging.stack_size,
            priority: self.logging.priority,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
