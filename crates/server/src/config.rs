use std::net::IpAddr;
use std::time::Duration;

use tether::NetConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub workers: usize,
    pub shutdown_timeout: Duration,
    pub net: NetConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout: Duration::from_secs(5),
            net: NetConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_port_check_hosts(mut self, hosts: Vec<IpAddr>) -> Self {
        self.net.port_check_hosts = hosts;
        self
    }
}
