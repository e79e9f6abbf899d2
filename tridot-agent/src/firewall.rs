use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::command::{CommandError, CommandRunner};

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("interface name required")]
    MissingInterface,

    #[error("Required binary '{binary}' not found")]
    MissingBinary { binary: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

const NAT_TABLE: &str = "tridot_nat";
const FILTER_TABLE: &str = "tridot";
const POSTROUTING_CHAIN: &str = "tridot_postrouting";
const FORWARD_CHAIN: &str = "tridot_forward";
const KILLSWITCH_OUT_CHAIN: &str = "tridot_killswitch_out";
const KILLSWITCH_IN_CHAIN: &str = "tridot_killswitch_in";

/// Applies NAT and kill-switch rule sets through `nft`.
///
/// Rules go into dedicated tables; each chain is flushed before its rules are
/// re-added, so applying a rule set twice leaves one copy. Application is
/// sequential and stops at the first failing command, which can leave a
/// prefix of the set in place.
#[derive(Clone)]
pub struct NetworkPolicy {
    runner: Arc<dyn CommandRunner>,
    nft: String,
}

impl NetworkPolicy {
    pub fn new(runner: Arc<dyn CommandRunner>, nft: impl Into<String>) -> Self {
        Self {
            runner,
            nft: nft.into(),
        }
    }

    /// Uses the `nft` binary found on this host.
    pub fn detect(runner: Arc<dyn CommandRunner>) -> Result<Self, FirewallError> {
        Ok(Self::new(runner, resolve_nft_path()?))
    }

    /// Masquerades tunnel traffic leaving the host and accepts forwarding for
    /// the tunnel interface. With `egress` set, only traffic leaving through
    /// that interface is masqueraded.
    pub fn apply_nat_rules(&self, iface: &str, egress: Option<&str>) -> Result<(), FirewallError> {
        let iface = require_interface(iface)?;
        tracing::info!(interface = iface, egress = egress.unwrap_or("any"), "Applying NAT rules");

        let masquerade = match egress {
            Some(egress) => format!("iifname {iface} oifname {egress} masquerade"),
            None => format!("iifname {iface} oifname != {iface} masquerade"),
        };

        let commands = [
            format!("add table ip {NAT_TABLE}"),
            format!(
                "add chain ip {NAT_TABLE} {POSTROUTING_CHAIN} {{ type nat hook postrouting priority 100 ; policy accept ; }}"
            ),
            format!("flush chain ip {NAT_TABLE} {POSTROUTING_CHAIN}"),
            format!("add rule ip {NAT_TABLE} {POSTROUTING_CHAIN} {masquerade}"),
            format!("add table inet {FILTER_TABLE}"),
            format!(
                "add chain inet {FILTER_TABLE} {FORWARD_CHAIN} {{ type filter hook forward priority 0 ; policy accept ; }}"
            ),
            format!("flush chain inet {FILTER_TABLE} {FORWARD_CHAIN}"),
            format!("add rule inet {FILTER_TABLE} {FORWARD_CHAIN} iifname {iface} accept"),
            format!(
                "add rule inet {FILTER_TABLE} {FORWARD_CHAIN} oifname {iface} ct state related,established accept"
            ),
        ];
        self.run_all(&commands)
    }

    /// Drops new outbound and inbound connections that do not use `iface`.
    pub fn enable_kill_switch(&self, iface: &str) -> Result<(), FirewallError> {
        let iface = require_interface(iface)?;
        tracing::info!(interface = iface, "Enabling kill switch");

        let commands = [
            format!("add table inet {FILTER_TABLE}"),
            format!(
                "add chain inet {FILTER_TABLE} {KILLSWITCH_OUT_CHAIN} {{ type filter hook output priority 0 ; policy accept ; }}"
            ),
            format!("flush chain inet {FILTER_TABLE} {KILLSWITCH_OUT_CHAIN}"),
            format!(
                "add rule inet {FILTER_TABLE} {KILLSWITCH_OUT_CHAIN} oifname != {iface} ct state new drop"
            ),
            format!(
                "add chain inet {FILTER_TABLE} {KILLSWITCH_IN_CHAIN} {{ type filter hook input priority 0 ; policy accept ; }}"
            ),
            format!("flush chain inet {FILTER_TABLE} {KILLSWITCH_IN_CHAIN}"),
            format!(
                "add rule inet {FILTER_TABLE} {KILLSWITCH_IN_CHAIN} iifname != {iface} ct state new drop"
            ),
        ];
        self.run_all(&commands)
    }

    fn run_all(&self, commands: &[String]) -> Result<(), FirewallError> {
        for command in commands {
            let args: Vec<&str> = command.split_whitespace().collect();
            self.runner.run(&self.nft, &args)?;
        }
        Ok(())
    }
}

fn require_interface(iface: &str) -> Result<&str, FirewallError> {
    let iface = iface.trim();
    if iface.is_empty() {
        return Err(FirewallError::MissingInterface);
    }
    Ok(iface)
}

fn resolve_nft_path() -> Result<String, FirewallError> {
    use std::env;

    if let Ok(custom) = env::var("TRIDOT_NFT_BIN") {
        if Path::new(&custom).is_file() {
            return Ok(custom);
        }
    }

    if let Some(path_os) = env::var_os("PATH") {
        for dir in env::split_paths(&path_os) {
            let candidate = dir.join("nft");
            if candidate.is_file() {
                return Ok(candidate.to_string_lossy().into_owned());
            }
        }
    }

    for candidate in ["/usr/sbin/nft", "/sbin/nft", "/usr/bin/nft", "/bin/nft"] {
        if Path::new(candidate).is_file() {
            return Ok(candidate.to_string());
        }
    }

    Err(FirewallError::MissingBinary {
        binary: "nft".to_string(),
    })
}
