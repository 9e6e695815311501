//! Ledger configuration.

use std::str::FromStr;

use anyhow::{Context, bail};
use rust_decimal::Decimal;

/// What to do when a reused SKU is offered at a different price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceMismatchPolicy {
    /// Keep the existing price, log a warning and report it to the caller.
    #[default]
    Warn,
    /// Refuse the production run.
    Reject,
}

impl FromStr for PriceMismatchPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(Self::Warn),
            "reject" => Ok(Self::Reject),
            other => bail!("unknown price mismatch policy '{other}' (expected warn|reject)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Allowed deviation (percent of the existing price) before a reuse counts as a mismatch.
    pub price_tolerance_pct: Decimal,
    pub price_mismatch_policy: PriceMismatchPolicy,
    /// Operator recorded on log entries when the caller names none.
    pub default_operator: String,
    pub sku_code_prefix: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            price_tolerance_pct: Decimal::from(5),
            price_mismatch_policy: PriceMismatchPolicy::Warn,
            default_operator: "system".to_string(),
            sku_code_prefix: "SKU".to_string(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `CRYSTALERP_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("CRYSTALERP_PRICE_TOLERANCE_PCT") {
            let pct = Decimal::from_str(raw.trim())
                .with_context(|| format!("CRYSTALERP_PRICE_TOLERANCE_PCT is not a number: '{raw}'"))?;
            if pct.is_sign_negative() {
                bail!("CRYSTALERP_PRICE_TOLERANCE_PCT cannot be negative");
            }
            config.price_tolerance_pct = pct;
        }
        if let Some(raw) = lookup("CRYSTALERP_PRICE_MISMATCH_POLICY") {
            config.price_mismatch_policy = raw
                .parse()
                .context("invalid CRYSTALERP_PRICE_MISMATCH_POLICY")?;
        }
        if let Some(raw) = lookup("CRYSTALERP_DEFAULT_OPERATOR").filter(|v| !v.trim().is_empty()) {
            config.default_operator = raw.trim().to_string();
        }
        if let Some(raw) = lookup("CRYSTALERP_SKU_PREFIX").filter(|v| !v.trim().is_empty()) {
            config.sku_code_prefix = raw.trim().to_string();
        }

        Ok(config)
    }

    /// Caller-supplied operator, or the configured default.
    pub fn operator_or_default(&self, operator: Option<&str>) -> String {
        operator
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .unwrap_or(&self.default_operator)
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_env() {
        let config = LedgerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.price_tolerance_pct, Decimal::from(5));
    }

    #[test]
    fn env_overrides_are_parsed() {
        let config = LedgerConfig::from_lookup(lookup(&[
            ("CRYSTALERP_PRICE_TOLERANCE_PCT", "2.5"),
            ("CRYSTALERP_PRICE_MISMATCH_POLICY", "Reject"),
            ("CRYSTALERP_DEFAULT_OPERATOR", "shopfront"),
            ("CRYSTALERP_SKU_PREFIX", "CR"),
        ]))
        .unwrap();

        assert_eq!(config.price_tolerance_pct, Decimal::new(25, 1));
        assert_eq!(config.price_mismatch_policy, PriceMismatchPolicy::Reject);
        assert_eq!(config.default_operator, "shopfront");
        assert_eq!(config.sku_code_prefix, "CR");
    }

    #[test]
    fn bad_values_are_errors() {
        assert!(LedgerConfig::from_lookup(lookup(&[("CRYSTALERP_PRICE_TOLERANCE_PCT", "lots")])).is_err());
        assert!(LedgerConfig::from_lookup(lookup(&[("CRYSTALERP_PRICE_TOLERANCE_PCT", "-1")])).is_err());
        assert!(LedgerConfig::from_lookup(lookup(&[("CRYSTALERP_PRICE_MISMATCH_POLICY", "average")])).is_err());
    }

    #[test]
    fn blank_operator_falls_back_to_default() {
        let config = LedgerConfig::default();
        assert_eq!(config.operator_or_default(Some("  ")), "system");
        assert_eq!(config.operator_or_default(Some("amy")), "amy");
        assert_eq!(config.operator_or_default(None), "system");
    }
}
