//! Text forms of link-layer and network addresses used by flow entries and logs.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Parse "aa:bb:cc:dd:ee:ff" (hyphens accepted too).
pub fn parse_mac(s: &str) -> Result<[u8; 6]> {
    let mut mac = [0; 6];
    let mut parts = s.trim().split(|c| c == ':' || c == '-');
    for byte in mac.iter_mut() {
        let part = parts.next().ok_or_else(|| Error::invalid(format!("MAC address {:?} too short", s)))?;
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid(format!("bad MAC address {:?}", s)));
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| Error::invalid(format!("bad MAC address {:?}", s)))?;
    }
    if parts.next().is_some() {
        return Err(Error::invalid(format!("MAC address {:?} too long", s)));
    }
    Ok(mac)
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    format!("{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            mac[0],
            mac[1],
            mac[2],
            mac[3],
            mac[4],
            mac[5])
}

/// Parse "a.b.c.d" or "a.b.c.d/len" into an address and prefix length.
pub fn parse_ipv4_prefix(s: &str) -> Result<(Ipv4Addr, u8)> {
    let s = s.trim();
    let (addr, len) = match s.split_once('/') {
        Some((addr, len)) => {
            let len = len.parse::<u8>()
                .ok()
                .filter(|l| *l <= 32)
                .ok_or_else(|| Error::invalid(format!("bad prefix length in {:?}", s)))?;
            (addr, len)
        }
        None => (s, 32),
    };
    let addr = Ipv4Addr::from_str(addr).map_err(|_| Error::invalid(format!("bad IPv4 address {:?}", s)))?;
    Ok((addr, len))
}

/// Netmask with the `len` high bits set.
pub fn prefix_mask(len: u8) -> u32 {
    match len {
        0 => 0,
        l if l >= 32 => u32::MAX,
        l => u32::MAX << (32 - l),
    }
}

/// A datapath id, printed the way operators read it: eight colon-separated hex bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dpid(pub u64);

impl fmt::Display for Dpid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(f,
               "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
               b[0],
               b[1],
               b[2],
               b[3],
               b[4],
               b[5],
               b[6],
               b[7])
    }
}

impl FromStr for Dpid {
    type Err = Error;

    /// Accepts the colon form or a bare hex number.
    fn from_str(s: &str) -> Result<Dpid> {
        let digits: String = s.trim().split(':').collect();
        if digits.is_empty() || digits.len() > 16 {
            return Err(Error::invalid(format!("bad datapath id {:?}", s)));
        }
        u64::from_str_radix(&digits, 16)
            .map(Dpid)
            .map_err(|_| Error::invalid(format!("bad datapath id {:?}", s)))
    }
}
