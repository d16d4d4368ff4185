//! Endpoint bring-up and the start-once gate for the workloads.
//!
//! The network stack reports each endpoint going up or down through a
//! [`NetworkEventListener`]. [`Bootstrap`] counts "up" reports and runs its
//! start action exactly once, when every configured endpoint has reported.
//! [`HostNetwork`] plays the stack's part on a hosted target: an endpoint is
//! up once its address can be bound on this machine.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::str::FromStr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::EndpointConfig;
use crate::log_printf;

/// One configured network identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: IpAddr,
    pub prefix_len: u8,
    pub gateway: Option<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
}

impl Endpoint {
    /// Subnet mask, for IPv4 endpoints.
    pub fn netmask(&self) -> Option<Ipv4Addr> {
        match self.address {
            IpAddr::V4(_) => {
                let bits = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                Some(Ipv4Addr::from(bits))
            }
            IpAddr::V6(_) => None,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

/// An endpoint string is not `address[/prefix]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointParseError(pub String);

impl fmt::Display for EndpointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint '{}'", self.0)
    }
}

impl std::error::Error for EndpointParseError {}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parse `address/prefix`; a bare address gets a full-length prefix.
    /// The result has no gateway and no DNS servers.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || EndpointParseError(s.to_string());
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };

        let address: IpAddr = addr.parse().map_err(|_| err())?;
        let max = if address.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| err())?,
            None => max,
        };
        if prefix_len > max {
            return Err(err());
        }

        Ok(Self {
            address,
            prefix_len,
            gateway: None,
            dns_servers: Vec::new(),
        })
    }
}

fn parse_ip(text: &str) -> Result<IpAddr, EndpointParseError> {
    text.trim()
        .parse()
        .map_err(|_| EndpointParseError(text.to_string()))
}

impl TryFrom<&EndpointConfig> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(config: &EndpointConfig) -> Result<Self, Self::Error> {
        let mut endpoint: Endpoint = config.address.parse()?;
        endpoint.gateway = config.gateway.as_deref().map(parse_ip).transpose()?;
        endpoint.dns_servers = config
            .dns_servers
            .iter()
            .map(|s| parse_ip(s))
            .collect::<Result<_, _>>()?;
        Ok(endpoint)
    }
}

/// Parse every configured endpoint.
pub fn parse_endpoints(configs: &[EndpointConfig]) -> Result<Vec<Endpoint>, EndpointParseError> {
    configs.iter().map(Endpoint::try_from).collect()
}

/// Callbacks from the network stack.
pub trait NetworkEventListener {
    fn on_network_up(&mut self, endpoint: &Endpoint);

    fn on_network_down(&mut self, endpoint: &Endpoint);

    /// Name this node registers under.
    fn hostname(&self) -> &str;

    /// Whether a name lookup is for this node.
    fn answers_name_query(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(self.hostname())
    }
}

/// Counts endpoint "up" reports and starts the workloads once.
pub struct Bootstrap<F: FnOnce()> {
    hostname: String,
    endpoint_count: usize,
    up_count: usize,
    start: Option<F>,
}

impl<F: FnOnce()> Bootstrap<F> {
    pub fn new(hostname: impl Into<String>, endpoint_count: usize, start: F) -> Self {
        Self {
            hostname: hostname.into(),
            endpoint_count,
            up_count: 0,
            start: Some(start),
        }
    }

    #[cfg(test)]
    pub fn up_count(&self) -> usize {
        self.up_count
    }

    /// Whether the start action has run.
    #[cfg(test)]
    pub fn started(&self) -> bool {
        self.start.is_none()
    }
}

impl<F: FnOnce()> NetworkEventListener for Bootstrap<F> {
    fn on_network_up(&mut self, endpoint: &Endpoint) {
        self.up_count += 1;

        log_printf!("IP Address: {}", endpoint.address);
        match endpoint.netmask() {
            Some(mask) => log_printf!("Subnet Mask: {mask}"),
            None => log_printf!("Prefix Length: {}", endpoint.prefix_len),
        }
        if let Some(gateway) = endpoint.gateway {
            log_printf!("Gateway Address: {gateway}");
        }
        for dns in &endpoint.dns_servers {
            log_printf!("DNS Server Address: {dns}");
        }
        info!(
            endpoint = %endpoint,
            up = self.up_count,
            total = self.endpoint_count,
            "Endpoint up"
        );

        if self.up_count >= self.endpoint_count {
            if let Some(start) = self.start.take() {
                info!(hostname = %self.hostname, "All endpoints up, starting workloads");
                start();
            }
        }
    }

    fn on_network_down(&mut self, endpoint: &Endpoint) {
        warn!(endpoint = %endpoint, "Endpoint down");
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }
}

/// Bring-up on a hosted target.
pub struct HostNetwork {
    endpoints: Vec<Endpoint>,
    poll_interval: Duration,
    /// Last state reported per endpoint.
    reported: Vec<Option<bool>>,
}

impl HostNetwork {
    pub fn new(endpoints: Vec<Endpoint>, poll_interval: Duration) -> Self {
        let reported = vec![None; endpoints.len()];
        Self {
            endpoints,
            poll_interval,
            reported,
        }
    }

    /// Endpoints not yet reported up.
    pub fn pending(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .iter()
            .zip(&self.reported)
            .filter(|(_, reported)| **reported != Some(true))
            .map(|(endpoint, _)| endpoint)
    }

    /// Addresses to answer a lookup of `name` with, if `listener` owns it.
    pub fn lookup(&self, listener: &dyn NetworkEventListener, name: &str) -> Vec<IpAddr> {
        if !listener.answers_name_query(name) {
            return Vec::new();
        }
        self.endpoints
            .iter()
            .zip(&self.reported)
            .filter(|(_, reported)| **reported == Some(true))
            .map(|(endpoint, _)| endpoint.address)
            .collect()
    }

    /// An endpoint is up when its address is assigned to this host.
    pub fn probe(endpoint: &Endpoint) -> io::Result<()> {
        UdpSocket::bind((endpoint.address, 0)).map(drop)
    }

    /// Check every endpoint not yet up, reporting each change once.
    ///
    /// Returns true when all endpoints are up.
    pub fn poll(&mut self, listener: &mut dyn NetworkEventListener) -> bool {
        let mut all_up = true;

        for (endpoint, reported) in self.endpoints.iter().zip(self.reported.iter_mut()) {
            if *reported == Some(true) {
                continue;
            }
            match Self::probe(endpoint) {
                Ok(()) => {
                    *reported = Some(true);
                    listener.on_network_up(endpoint);
                }
                Err(e) => {
                    all_up = false;
                    if *reported != Some(false) {
                        *reported = Some(false);
                        warn!(endpoint = %endpoint, error = %e, "Endpoint address not available");
                        listener.on_network_down(endpoint);
                    }
                }
            }
        }

        all_up
    }

    /// Poll until every endpoint is up.
    pub fn bring_up(&mut self, listener: &mut dyn NetworkEventListener) {
        while !self.poll(listener) {
            let pending: Vec<String> = self.pending().map(|e| e.to_string()).collect();
            warn!(pending = ?pending, "Waiting for endpoints");
            thread::sleep(self.poll_interval);
        }
    }
}
