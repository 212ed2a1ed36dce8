use rust_decimal::Decimal;
use serde::Deserialize;

use crate::commission::CommissionRates;
use crate::error::NetworkError;
use crate::service::DEFAULT_TEAM_DEPTH;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_sponsor_rate")]
    pub sponsor_commission_rate: Decimal,
    #[serde(default = "default_grand_sponsor_rate")]
    pub grand_sponsor_commission_rate: Decimal,
    #[serde(default = "default_team_depth")]
    pub team_depth: u32,
}

fn default_max_connections() -> u32 {
    8
}

fn default_sponsor_rate() -> Decimal {
    CommissionRates::default().sponsor
}

fn default_grand_sponsor_rate() -> Decimal {
    CommissionRates::default().grand_sponsor
}

fn default_team_depth() -> u32 {
    DEFAULT_TEAM_DEPTH
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }

    pub fn commission_rates(&self) -> Result<CommissionRates, NetworkError> {
        CommissionRates::new(
            self.sponsor_commission_rate,
            self.grand_sponsor_commission_rate,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let mut builder = config::Config::builder();
        for (key, value) in pairs {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn defaults_apply_when_only_required_keys_are_set() {
        let cfg = from_pairs(&[
            ("server_port", "8000"),
            ("database_url", "postgres://localhost/network"),
        ]);
        assert_eq!(cfg.server_port, 8000);
        assert_eq!(cfg.max_connections, 8);
        assert_eq!(cfg.team_depth, 2);
        assert_eq!(cfg.commission_rates().unwrap(), CommissionRates::default());
    }

    #[test]
    fn rates_can_be_overridden() {
        let cfg = from_pairs(&[
            ("server_port", "8000"),
            ("database_url", "postgres://localhost/network"),
            ("sponsor_commission_rate", "0.25"),
            ("grand_sponsor_commission_rate", "0.05"),
        ]);
        let rates = cfg.commission_rates().unwrap();
        assert_eq!(rates.sponsor, Decimal::new(25, 2));
        assert_eq!(rates.grand_sponsor, Decimal::new(5, 2));
    }

    #[test]
    fn oversized_rates_are_rejected() {
        let cfg = from_pairs(&[
            ("server_port", "8000"),
            ("database_url", "postgres://localhost/network"),
            ("sponsor_commission_rate", "0.95"),
            ("grand_sponsor_commission_rate", "0.10"),
        ]);
        assert!(cfg.commission_rates().is_err());
    }
}
