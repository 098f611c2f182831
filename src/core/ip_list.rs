//! Source-address allow-list for a transport.
//!
//! Stored form is a comma-separated list of addresses and CIDR blocks, e.g.
//! `"63.196.107.82/29,209.79.220.20,192.168.1.0/24"`. A bare address is a
//! host route. An empty list allows every address.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use crate::error::GateError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAllowList {
    nets: Vec<IpNet>,
}

impl IpAllowList {
    pub fn new(nets: Vec<IpNet>) -> Self {
        Self { nets }
    }

    pub fn is_empty(&self) -> bool {
        self.nets.is_empty()
    }

    pub fn entries(&self) -> &[IpNet] {
        &self.nets
    }

    /// True if the list is empty or any entry contains `addr`.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`, as reported by dual-stack
    /// listeners) are matched as their IPv4 form.
    pub fn allows(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        self.nets.is_empty() || self.nets.iter().any(|net| net.contains(&addr))
    }
}

impl FromStr for IpAllowList {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut nets = Vec::new();
        for entry in s.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let net = if entry.contains('/') {
                entry.parse::<IpNet>().map_err(|e| {
                    GateError::InvalidInput(format!("invalid CIDR block '{entry}': {e}"))
                })?
            } else {
                let addr = entry.parse::<IpAddr>().map_err(|e| {
                    GateError::InvalidInput(format!("invalid IP address '{entry}': {e}"))
                })?;
                IpNet::from(addr)
            };
            nets.push(net);
        }
        Ok(Self { nets })
    }
}

impl fmt::Display for IpAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, net) in self.nets.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            // Host routes print as the bare address.
            if net.prefix_len() == net.max_prefix_len() {
                write!(f, "{}", net.addr())?;
            } else {
                write!(f, "{net}")?;
            }
        }
        Ok(())
    }
}
