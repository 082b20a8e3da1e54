use crate::logging::LogArgs;
use crate::request::Target;
use anyhow::{Context, Result};
use clap::Parser;
use serde_derive::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5672;

/// Command line of the broker.
#[derive(Debug, Parser)]
#[command(name = "qbroker", version, about = "AMQP message broker for testing")]
pub struct BrokerCli {
    /// Listen on this host
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,
    /// Listen on this port
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,
    /// Path to the config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub network: Network,
    pub broker: Broker,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Network {
    pub host: String,
    pub port: u16,
}

impl Default for Network {
    fn default() -> Self {
        Network {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Broker {
    /// Container id the broker presents to its peers, a random one if not set.
    pub container_id: Option<String>,
}

impl BrokerConfig {
    /// The `host:port` the broker listens on.
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.network.host, self.network.port)
    }
}

pub fn parse_config(path: &Path) -> Result<BrokerConfig> {
    let cfg = std::fs::read_to_string(path).with_context(|| format!("Cannot read config file {:?}", path))?;

    parse_config_str(&cfg)
}

fn parse_config_str(cfg: &str) -> Result<BrokerConfig> {
    Ok(toml::from_str(cfg)?)
}

impl BrokerCli {
    /// Load the config file if any and apply the command line overrides.
    pub fn into_config(self) -> Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => parse_config(path)?,
            None => BrokerConfig::default(),
        };

        if let Some(host) = self.host {
            config.network.host = host;
        }

        if let Some(port) = self.port {
            config.network.port = port;
        }

        Ok(config)
    }
}

/// Command line of the request client.
#[derive(Debug, Parser)]
#[command(
    name = "qrequest",
    version,
    about = "Send AMQP requests and print the responses",
    after_help = "A URL is [amqp://][HOST[:PORT]]/ADDRESS or just ADDRESS, the default host is 127.0.0.1 \
                  and the default port is 5672. Without --message the requests are read line by line from \
                  the input."
)]
pub struct RequestCli {
    /// The location of the queues the requests are sent to
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,
    /// A request body, can be repeated
    #[arg(short, long = "message", value_name = "CONTENT")]
    pub messages: Vec<String>,
    /// Read the requests from a file instead of the standard input
    #[arg(long, value_name = "FILE")]
    pub input: Option<PathBuf>,
    /// Write the responses to a file instead of the standard output
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,
    /// Print the responses in JSON format
    #[arg(long)]
    pub json: bool,
    /// Send the requests settled, without waiting for the outcome
    #[arg(long)]
    pub presettled: bool,
    /// Give up after this many seconds, 0 means no timeout
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    pub timeout: u64,
    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Default)]
pub struct RequestConfig {
    pub targets: Vec<Target>,
    /// Request bodies given on the command line; if empty the input is read.
    pub messages: Vec<String>,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub json: bool,
    pub presettled: bool,
    pub timeout: Option<Duration>,
}

impl RequestCli {
    pub fn into_config(self) -> Result<RequestConfig> {
        let targets = self
            .urls
            .iter()
            .map(|url| url.parse::<Target>())
            .collect::<Result<Vec<_>>>()?;

        Ok(RequestConfig {
            targets,
            messages: self.messages,
            input: self.input,
            output: self.output,
            json: self.json,
            presettled: self.presettled,
            timeout: match self.timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        })
    }
}
