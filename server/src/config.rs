use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use common::Tokens;

use crate::engine::{EngineConfig, POLL_CREATION_COST};

#[derive(Parser, Debug, Clone)]
#[command(name = "settlement-server", about = "Poll betting and pari-mutuel settlement server")]
pub struct ServerConfig {
    /// Address the websocket listener binds to
    #[arg(long, env = "SETTLEMENT_BIND", default_value = "127.0.0.1:6379")]
    pub bind: SocketAddr,

    /// Tokens charged for creating a poll
    #[arg(long, env = "SETTLEMENT_CREATION_FEE", default_value_t = POLL_CREATION_COST, value_parser = parse_fee)]
    pub creation_fee: Tokens,

    /// How long deposit verification takes, in milliseconds
    #[arg(long, env = "SETTLEMENT_DEPOSIT_DELAY_MS", default_value_t = 2000)]
    pub deposit_delay_ms: u64,

    /// Depth of the engine work queue
    #[arg(long, env = "SETTLEMENT_QUEUE_DEPTH", default_value_t = 32)]
    pub queue_depth: usize,

    /// MessagePack seed file to start from instead of the demo fixtures
    #[arg(long, env = "SETTLEMENT_SEED")]
    pub seed: Option<PathBuf>,

    /// Start with no users, polls or bets
    #[arg(long, env = "SETTLEMENT_EMPTY", conflicts_with = "seed")]
    pub empty: bool,
}

impl ServerConfig {
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            creation_fee: self.creation_fee,
        }
    }

    pub fn deposit_delay(&self) -> Duration {
        Duration::from_millis(self.deposit_delay_ms)
    }
}

fn parse_fee(raw: &str) -> Result<Tokens, String> {
    let fee: Tokens = raw.parse().map_err(|e| format!("{e}"))?;
    if !(fee.is_finite() && fee >= 0.0) {
        return Err(format!("fee must be a non-negative amount, got {raw}"));
    }
    Ok(fee)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_deployment() {
        let config = ServerConfig::try_parse_from(["settlement-server"]).unwrap();
        assert_eq!(config.bind, "127.0.0.1:6379".parse().unwrap());
        assert_eq!(config.engine(), EngineConfig::default());
        assert_eq!(config.deposit_delay(), Duration::from_secs(2));
        assert_eq!(config.queue_depth, 32);
        assert!(config.seed.is_none());
        assert!(!config.empty);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "settlement-server",
            "--bind",
            "0.0.0.0:9000",
            "--creation-fee",
            "10",
            "--empty",
        ])
        .unwrap();
        assert_eq!(config.bind.port(), 9000);
        assert_eq!(config.engine().creation_fee, 10.0);
        assert!(config.empty);
    }

    #[test]
    fn negative_or_nan_fees_are_refused() {
        for fee in ["-1000", "NaN", "inf", "free"] {
            assert!(
                ServerConfig::try_parse_from(["settlement-server", "--creation-fee", fee]).is_err(),
                "accepted fee {fee}"
            );
        }
        let config =
            ServerConfig::try_parse_from(["settlement-server", "--creation-fee", "0"]).unwrap();
        assert_eq!(config.creation_fee, 0.0);
    }
}
