use anyhow::{bail, Result};
use rand::Rng;

use crate::evaluator::{Consensus, EvaluatorConfig};
use crate::indicators::WickThresholds;
use crate::reconcile::ReconcileConfig;
use crate::risk::RiskConfig;
use crate::signals::PatternThresholds;
use crate::strategies::{SniperConfig, StrategyKind};
use crate::strategy::IndicatorConfig;

pub const DEFAULT_VENUE_URL: &str = "wss://ws.derivws.com/websockets/v3";
/// Longest accepted breaker cooldown.
pub const MAX_PAUSE_SECS: u64 = 86_400;
pub const SELECTIVITY_FLOOR: f64 = 1.0;
pub const SELECTIVITY_CEILING: f64 = 1.3;

#[derive(Debug, Clone)]
pub struct Config {
    pub instrument: String,
    pub app_id: String,
    /// Unset runs against the simulated venue.
    pub api_token: Option<String>,
    pub venue_url: String,
    pub currency: String,
    pub strategies: Vec<StrategyKind>,
    pub auto_duration: u32,
    pub auto_duration_unit: String,
    pub manual_duration: u32,
    pub manual_duration_unit: String,
    pub history_count: usize,
    pub candle_cap: usize,
    pub trades_db: Option<String>,
    pub trades_url: Option<String>,
    pub instance_id: String,
    pub device_name: String,
    pub risk: RiskConfig,
    pub reconcile: ReconcileConfig,
    pub evaluator: EvaluatorConfig,
    pub indicators: IndicatorConfig,
    pub sniper: SniperConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: "R_100".to_string(),
            app_id: "1089".to_string(),
            api_token: None,
            venue_url: DEFAULT_VENUE_URL.to_string(),
            currency: "USD".to_string(),
            strategies: vec![StrategyKind::Sniper],
            auto_duration: 1,
            auto_duration_unit: "m".to_string(),
            manual_duration: 5,
            manual_duration_unit: "t".to_string(),
            history_count: 300,
            candle_cap: 1500,
            trades_db: None,
            trades_url: None,
            instance_id: random_instance_id(),
            device_name: "Main PC".to_string(),
            risk: RiskConfig::default(),
            reconcile: ReconcileConfig::default(),
            evaluator: EvaluatorConfig::default(),
            indicators: IndicatorConfig::default(),
            sniper: SniperConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// `TK-` followed by nine upper-case alphanumerics.
pub fn random_instance_id() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect();
    format!("TK-{}", suffix)
}

impl Config {
    /// Reads the environment, then rejects values the risk controller
    /// cannot honour.
    pub fn from_env() -> Result<Self> {
        let cfg = Self::read_env();
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_env() -> Self {
        let d = Config::default();

        let strategies = match env_opt("STRATEGIES") {
            Some(list) => StrategyKind::parse_list(&list),
            None => d.strategies.clone(),
        };

        let risk = RiskConfig {
            base_stake: env_parse("BASE_STAKE", d.risk.base_stake),
            auto_scale: env_bool("AUTO_SCALE", d.risk.auto_scale),
            compounding: env_bool("COMPOUNDING", d.risk.compounding),
            compound_levels: env_parse("COMPOUND_LEVELS", d.risk.compound_levels),
            safety_circuit: env_bool("SAFETY_CIRCUIT", d.risk.safety_circuit),
            max_losses: env_parse("MAX_LOSSES", d.risk.max_losses),
            pause_secs: env_parse("PAUSE_SECS", d.risk.pause_secs),
            selectivity_step: env_parse("SELECTIVITY_STEP", d.risk.selectivity_step),
            selectivity_cap: env_parse("SELECTIVITY_CAP", d.risk.selectivity_cap),
            level_boost: env_parse("LEVEL_BOOST", d.risk.level_boost),
            ..d.risk.clone()
        };

        let reconcile = ReconcileConfig {
            sequential: env_bool("SEQUENTIAL", d.reconcile.sequential),
            grace_secs: env_parse("ORDER_GRACE_SECS", d.reconcile.grace_secs),
            retention_secs: env_parse("ORDER_RETENTION_SECS", d.reconcile.retention_secs),
        };

        let evaluator = EvaluatorConfig {
            consensus: env_opt("CONSENSUS").and_then(|v| Consensus::parse(&v)).unwrap_or(d.evaluator.consensus),
            rest_secs: env_parse("POST_TRADE_REST_SECS", d.evaluator.rest_secs),
            window_secs: env_parse("CANDLE_WINDOW_SECS", d.evaluator.window_secs),
        };

        let p = &d.indicators.patterns;
        let w = &d.indicators.wicks;
        let indicators = IndicatorConfig {
            patterns: PatternThresholds {
                lateral_gap_max: env_parse("LATERAL_GAP_MAX", p.lateral_gap_max),
                trend_gap_min: env_parse("TREND_GAP_MIN", p.trend_gap_min),
                near_sma_pct: env_parse("NEAR_SMA_PCT", p.near_sma_pct),
                pullback_band: env_parse("PULLBACK_BAND", p.pullback_band),
                ..*p
            },
            wicks: WickThresholds {
                body_ratio: env_parse("WICK_BODY_RATIO", w.body_ratio),
                range_pct: env_parse("WICK_RANGE_PCT", w.range_pct),
            },
            ..d.indicators.clone()
        };

        Self {
            instrument: env_string("INSTRUMENT", &d.instrument),
            app_id: env_string("APP_ID", &d.app_id),
            api_token: env_opt("API_TOKEN"),
            venue_url: env_string("VENUE_URL", &d.venue_url),
            currency: env_string("CURRENCY", &d.currency),
            strategies,
            auto_duration: env_parse("AUTO_DURATION", d.auto_duration),
            auto_duration_unit: env_string("AUTO_DURATION_UNIT", &d.auto_duration_unit),
            manual_duration: env_parse("MANUAL_DURATION", d.manual_duration),
            manual_duration_unit: env_string("MANUAL_DURATION_UNIT", &d.manual_duration_unit),
            history_count: env_parse("HISTORY_COUNT", d.history_count),
            candle_cap: env_parse("CANDLE_CAP", d.candle_cap),
            trades_db: env_opt("TRADES_DB"),
            trades_url: env_opt("TRADES_URL"),
            instance_id: env_opt("INSTANCE_ID").unwrap_or(d.instance_id.clone()),
            device_name: env_string("DEVICE_NAME", &d.device_name),
            risk,
            reconcile,
            evaluator,
            indicators,
            sniper: d.sniper.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.risk;
        if !r.base_stake.is_finite() || r.base_stake <= 0.0 {
            bail!("BASE_STAKE must be a positive amount, got {}", r.base_stake);
        }
        if r.max_losses == 0 {
            bail!("MAX_LOSSES must be at least 1");
        }
        if r.pause_secs > MAX_PAUSE_SECS {
            bail!("PAUSE_SECS must be at most {}, got {}", MAX_PAUSE_SECS, r.pause_secs);
        }
        if !(SELECTIVITY_FLOOR..=SELECTIVITY_CEILING).contains(&r.selectivity_cap) {
            bail!(
                "SELECTIVITY_CAP must lie in [{}, {}], got {}",
                SELECTIVITY_FLOOR,
                SELECTIVITY_CEILING,
                r.selectivity_cap
            );
        }
        if !r.selectivity_step.is_finite() || r.selectivity_step < 0.0 {
            bail!("SELECTIVITY_STEP must be non-negative, got {}", r.selectivity_step);
        }
        if self.reconcile.retention_secs == 0 {
            bail!("ORDER_RETENTION_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn is_simulated(&self) -> bool {
        self.api_token.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.instrument, "R_100");
        assert_eq!(cfg.strategies, vec![StrategyKind::Sniper]);
        assert_eq!((cfg.auto_duration, cfg.auto_duration_unit.as_str()), (1, "m"));
        assert_eq!(cfg.reconcile.grace_secs, 45);
        assert!(cfg.is_simulated());
    }

    #[test]
    fn test_validate_rejects_out_of_range_risk() {
        assert!(Config::default().validate().is_ok());

        let mut cfg = Config::default();
        cfg.risk.selectivity_cap = 1.5;
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("SELECTIVITY_CAP"), "unexpected error: {}", err);

        let mut cfg = Config::default();
        cfg.risk.selectivity_cap = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.risk.selectivity_cap = 0.9;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.risk.max_losses = 0;
        assert!(cfg.validate().unwrap_err().to_string().contains("MAX_LOSSES"));

        let mut cfg = Config::default();
        cfg.risk.pause_secs = u64::MAX;
        assert!(cfg.validate().unwrap_err().to_string().contains("PAUSE_SECS"));
        cfg.risk.pause_secs = MAX_PAUSE_SECS;
        assert!(cfg.validate().is_ok());

        let mut cfg = Config::default();
        cfg.risk.base_stake = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_instance_id_format() {
        let id = random_instance_id();
        assert_eq!(id.len(), 12);
        assert!(id.starts_with("TK-"));
        assert!(id[3..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_env_parse_falls_back() {
        // keys no other test sets
        std::env::set_var("TK_TEST_BAD_NUMBER", "abc");
        assert_eq!(env_parse("TK_TEST_BAD_NUMBER", 7u32), 7);
        std::env::set_var("TK_TEST_GOOD_NUMBER", " 12 ");
        assert_eq!(env_parse("TK_TEST_GOOD_NUMBER", 7u32), 12);
        assert_eq!(env_parse("TK_TEST_MISSING", 1.5f64), 1.5);
        assert!(!env_bool("TK_TEST_MISSING", false));
    }
}
