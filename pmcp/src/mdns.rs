//! mDNS advertisement of the vision API.
//!
//! Service type `_http._tcp`, instance name containing `physical-mcp`, port
//! equal to the vision-api port, so mobile clients on the LAN can find the
//! engine without configuration.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{info, warn};

pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

/// Best local non-loopback IPv4, used for both mDNS and `doctor`.
pub fn lan_ip() -> Option<std::net::Ipv4Addr> {
    let addrs = if_addrs::get_if_addrs().ok()?;
    addrs
        .into_iter()
        .filter(|ifa| !ifa.is_loopback())
        .find_map(|ifa| match ifa.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip),
            _ => None,
        })
}

impl MdnsAdvertiser {
    pub fn start(port: u16) -> Result<Self, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;
        let host = hostname();
        let instance = format!("physical-mcp-{host}");
        let mut properties = HashMap::new();
        properties.insert("path".to_string(), "/health".to_string());
        properties.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

        let mut info = ServiceInfo::new(
            "_http._tcp.local.",
            &instance,
            &format!("{host}.local."),
            "",
            port,
            properties,
        )?;
        info = info.enable_addr_auto();
        let fullname = info.get_fullname().to_string();
        daemon.register(info)?;
        info!("mDNS: advertising {fullname} on port {port}");
        Ok(Self { daemon, fullname })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("mDNS unregister failed: {e}");
        }
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "pmcp".to_string())
}
