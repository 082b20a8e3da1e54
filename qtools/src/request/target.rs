use crate::config::{DEFAULT_HOST, DEFAULT_PORT};
use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Where the requests go: the broker to connect to and the address of the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: u16,
    pub address: String,
}

impl Target {
    /// The `host:port` to connect to.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    /// Parse `[amqp://][HOST[:PORT]]/ADDRESS` or a plain `ADDRESS`.
    fn from_str(s: &str) -> Result<Self> {
        if !s.contains('/') {
            if s.is_empty() {
                return Err(anyhow!("Empty target address"));
            }

            return Ok(Target {
                host: DEFAULT_HOST.to_string(),
                port: DEFAULT_PORT,
                address: s.to_string(),
            });
        }

        let url = if s.contains("://") {
            Url::parse(s)?
        } else if let Some(rest) = s.strip_prefix("//") {
            Url::parse(&format!("amqp://{}", rest))?
        } else if let Some(rest) = s.strip_prefix('/') {
            Url::parse(&format!("amqp://{}/{}", DEFAULT_HOST, rest))?
        } else {
            Url::parse(&format!("amqp://{}", s))?
        };

        if url.scheme() != "amqp" {
            return Err(anyhow!("Unsupported scheme in {}", s));
        }

        let address = url.path().trim_start_matches('/');

        if address.is_empty() {
            return Err(anyhow!("No address in {}", s));
        }

        Ok(Target {
            host: url
                .host_str()
                .filter(|host| !host.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            address: address.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "amqp://{}/{}", self.authority(), self.address)
    }
}
