//! Process lifecycle configuration.
//!
//! Argument parsing itself is out of scope (spec §1): this is a minimal
//! positional parser for the exact CLI contract spec §6 specifies, not a
//! general-purpose argument-parsing framework.

use std::time::Duration;

use crate::error::{MarketError, Result};
use crate::model::PeerId;

#[derive(Debug, Clone)]
pub struct Config {
    pub bootstrap_host: PeerId,
    pub n_peers: usize,
    pub heartbeat_enabled: bool,
    pub heartbeat_timeout: Duration,
    /// Number of distinct traders the bootstrap election loop converges to.
    /// Not part of the spec's four positional CLI args; defaults to the
    /// two-trader assumption `HeartbeatMonitor` is built around (spec
    /// §4.3), overridable via a fifth optional argument.
    pub n_traders: usize,
    /// Whether traders consult their in-memory cache before falling back
    /// to the warehouse (spec §4.4's `with_cache` flag). Defaults on;
    /// overridable via a sixth optional argument.
    pub with_cache: bool,
}

impl Config {
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 4 {
            return Err(MarketError::Config(
                "usage: <bootstrap_host> <n_peers> <heartbeat_enabled:true|false> <heartbeat_timeout_seconds> [n_traders] [with_cache:true|false]".into(),
            ));
        }
        let bootstrap_host = PeerId::new(args[0].clone())?;
        let n_peers: usize = args[1]
            .parse()
            .map_err(|_| MarketError::Config(format!("invalid n_peers: {}", args[1])))?;
        let heartbeat_enabled = parse_bool(&args[2])?;
        let heartbeat_timeout_secs: u64 = args[3]
            .parse()
            .map_err(|_| MarketError::Config(format!("invalid heartbeat_timeout_seconds: {}", args[3])))?;
        let n_traders = match args.get(4) {
            Some(v) => v.parse().map_err(|_| MarketError::Config(format!("invalid n_traders: {}", v)))?,
            None => 2,
        };
        let with_cache = match args.get(5) {
            Some(v) => parse_bool(v)?,
            None => true,
        };

        Ok(Config {
            bootstrap_host,
            n_peers,
            heartbeat_enabled,
            heartbeat_timeout: Duration::from_secs(heartbeat_timeout_secs),
            n_traders,
            with_cache,
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(MarketError::Config(format!("expected true|false, got {:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_required_positionals() {
        let cfg = Config::from_args(&args("peer0 6 true 10")).unwrap();
        assert_eq!(cfg.n_peers, 6);
        assert!(cfg.heartbeat_enabled);
        assert_eq!(cfg.heartbeat_timeout.as_secs(), 10);
        assert_eq!(cfg.n_traders, 2);
        assert!(cfg.with_cache);
    }

    #[test]
    fn rejects_missing_args() {
        assert!(Config::from_args(&args("peer0 6 true")).is_err());
    }

    #[test]
    fn rejects_bad_bool() {
        assert!(Config::from_args(&args("peer0 6 maybe 10")).is_err());
    }
}
