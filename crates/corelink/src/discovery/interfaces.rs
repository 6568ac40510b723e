// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IPv4 interface enumeration for the discovery fan-out.
//!
//! - Linux: parses `ip -4 addr show` output, which carries both the
//!   address and the directed broadcast (`brd`) of each interface.
//! - Other platforms, or when `ip` is unavailable: falls back to the
//!   `local_ip_address` crate. The fallback has no netmask information,
//!   so the broadcast address is unknown and the caller uses the limited
//!   broadcast (255.255.255.255) instead.

use std::net::Ipv4Addr;

/// One usable (up, non-loopback) IPv4 interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfaceV4 {
    pub addr: Ipv4Addr,
    /// Directed broadcast address, when the platform reports one.
    pub broadcast: Option<Ipv4Addr>,
}

/// Enumerate non-loopback IPv4 interfaces.
///
/// `CORELINK_SOOD_IF` overrides the list with a single address (no
/// broadcast) for testing and multi-homed debugging.
pub fn interfaces() -> Vec<IfaceV4> {
    if let Ok(var) = std::env::var("CORELINK_SOOD_IF") {
        if let Ok(addr) = var.parse::<Ipv4Addr>() {
            log::debug!("[sood] using CORELINK_SOOD_IF override: {addr}");
            return vec![IfaceV4 { addr, broadcast: None }];
        }
    }

    interfaces_platform()
}

#[cfg(target_os = "linux")]
fn interfaces_platform() -> Vec<IfaceV4> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            log::debug!("[sood] 'ip' command not found, using local_ip_address crate");
            return interfaces_crate();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut out = Vec::new();

    for line in stdout.lines() {
        if line.contains("127.0.0.1") || line.contains("host lo") {
            continue;
        }
        let Some(inet_part) = line.trim().strip_prefix("inet ") else {
            continue;
        };
        let mut tokens = inet_part.split_whitespace();
        let Some(addr_spec) = tokens.next() else { continue };
        let mut spec = addr_spec.split('/');
        let Some(addr) = spec.next().and_then(|s| s.parse::<Ipv4Addr>().ok()) else {
            continue;
        };
        let prefix_len = spec.next().and_then(|s| s.parse::<u8>().ok());

        // Prefer the kernel-reported `brd`, else derive it from the prefix.
        let mut broadcast = None;
        let rest: Vec<&str> = tokens.collect();
        for pair in rest.windows(2) {
            if pair[0] == "brd" {
                broadcast = pair[1].parse::<Ipv4Addr>().ok();
            }
        }
        if broadcast.is_none() {
            broadcast = prefix_len.and_then(|p| directed_broadcast(addr, p));
        }

        out.push(IfaceV4 { addr, broadcast });
    }

    if out.is_empty() {
        log::debug!("[sood] no interfaces from 'ip', using local_ip_address crate");
        return interfaces_crate();
    }
    out
}

#[cfg(not(target_os = "linux"))]
fn interfaces_platform() -> Vec<IfaceV4> {
    interfaces_crate()
}

fn interfaces_crate() -> Vec<IfaceV4> {
    use std::net::IpAddr;

    let interfaces = match local_ip_address::list_afinet_netifas() {
        Ok(ifs) => ifs,
        Err(e) => {
            log::debug!("[sood] failed to list network interfaces: {e}");
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter_map(|(_name, ip)| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() => Some(IfaceV4 { addr: v4, broadcast: None }),
            _ => None,
        })
        .collect()
}

/// Directed broadcast for `addr/prefix_len`.
fn directed_broadcast(addr: Ipv4Addr, prefix_len: u8) -> Option<Ipv4Addr> {
    if prefix_len > 32 {
        return None;
    }
    let mask: u32 = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
    Some(Ipv4Addr::from(u32::from(addr) | !mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directed_broadcast_common_prefixes() {
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(192, 168, 1, 10), 24),
            Some(Ipv4Addr::new(192, 168, 1, 255))
        );
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(10, 0, 0, 1), 8),
            Some(Ipv4Addr::new(10, 255, 255, 255))
        );
        assert_eq!(
            directed_broadcast(Ipv4Addr::new(172, 16, 4, 2), 31),
            Some(Ipv4Addr::new(172, 16, 4, 3))
        );
        assert_eq!(directed_broadcast(Ipv4Addr::new(1, 2, 3, 4), 33), None);
    }
}
