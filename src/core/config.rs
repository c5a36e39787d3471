//! Environment-driven configuration.

use std::env;
use std::path::PathBuf;

const SECRET_ENV: &str = "EPOCHMESH_SECRET";
const ROOT_ENV: &str = "EPOCHMESH_ROOT";
const SLO_MS_ENV: &str = "EPOCHMESH_SLO_MS";
const USD_BUDGET_ENV: &str = "EPOCHMESH_USD_BUDGET";
const SEGMENTS_ENV: &str = "EPOCHMESH_SEGMENTS";
const CYCLES_ENV: &str = "EPOCHMESH_CYCLES";
const SEED_ENV: &str = "EPOCHMESH_SEED";
const ALPHA_CEILING_ENV: &str = "EPOCHMESH_ALPHA_CEILING";

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Shared integrity secret. This seeds the segment chain root and is an
    /// integrity measure against accidental corruption only; it is not a
    /// security boundary and must not be treated as one.
    pub secret: String,
    /// Store root directory.
    pub root: PathBuf,
    /// SLO latency target in milliseconds for segment SLA records.
    pub slo_ms: u64,
    /// Total synthetic USD budget across a segment run.
    pub usd_budget: f64,
    /// Number of segments for batch runs.
    pub segments: u32,
    /// Cycles executed per segment.
    pub cycles_per_segment: u32,
    /// RNG seed for synthetic cycles; `None` draws from entropy.
    pub seed: Option<u64>,
    /// Alpha Ceiling cap for resource requirements.
    pub alpha_ceiling: i64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            secret: "epoch-mesh-secret".to_string(),
            root: PathBuf::from("./ledger"),
            slo_ms: 900,
            usd_budget: 25.0,
            segments: 3,
            cycles_per_segment: 5,
            seed: None,
            alpha_ceiling: 100,
        }
    }
}

impl MeshConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            secret: env::var(SECRET_ENV).unwrap_or(defaults.secret),
            root: env::var(ROOT_ENV).map(PathBuf::from).unwrap_or(defaults.root),
            slo_ms: parse_env(SLO_MS_ENV).unwrap_or(defaults.slo_ms),
            usd_budget: parse_env(USD_BUDGET_ENV).unwrap_or(defaults.usd_budget),
            segments: parse_env(SEGMENTS_ENV).unwrap_or(defaults.segments),
            cycles_per_segment: parse_env(CYCLES_ENV).unwrap_or(defaults.cycles_per_segment),
            seed: parse_env(SEED_ENV),
            alpha_ceiling: parse_env(ALPHA_CEILING_ENV).unwrap_or(defaults.alpha_ceiling),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MeshConfig::default();
        assert_eq!(cfg.alpha_ceiling, 100);
        assert_eq!(cfg.root, PathBuf::from("./ledger"));
        assert!(cfg.seed.is_none());
    }
}
