//! Region layout for the analyzer pool.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::error::AnalyzerError;
use crate::gemini::{GeminiAnalyzer, GeminiConfig};
use crate::pool::{AnalyzerHandle, AnalyzerPool, AnalyzerPoolConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
}

/// One region served by the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionConfig {
    pub name: String,
    pub capacity: usize,
    pub api_key: String,
}

/// Read `ANALYZER_REGIONS` and the matching credentials.
///
/// Each region uses `GEMINI_API_KEY_<REGION>` when set and falls back to
/// `GEMINI_API_KEY`. Region names are upper-cased with `-` mapped to `_`.
pub fn regions_from_env() -> Result<Vec<RegionConfig>, ConfigError> {
    let names: Vec<String> = std::env::var("ANALYZER_REGIONS")
        .unwrap_or_else(|_| "default".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if names.is_empty() {
        return Err(ConfigError::Invalid("ANALYZER_REGIONS is empty".to_string()));
    }

    let capacity = match std::env::var("ANALYZER_CAPACITY_PER_REGION") {
        Ok(raw) => raw
            .parse::<usize>()
            .ok()
            .filter(|c| *c > 0)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("ANALYZER_CAPACITY_PER_REGION={}", raw))
            })?,
        Err(_) => 2,
    };

    let shared_key = std::env::var("GEMINI_API_KEY").ok();

    names
        .into_iter()
        .map(|name| {
            let var = format!("GEMINI_API_KEY_{}", region_env_suffix(&name));
            let api_key = std::env::var(&var)
                .ok()
                .or_else(|| shared_key.clone())
                .ok_or_else(|| ConfigError::Missing(format!("{} or GEMINI_API_KEY", var)))?;
            Ok(RegionConfig {
                name,
                capacity,
                api_key,
            })
        })
        .collect()
}

fn region_env_suffix(region: &str) -> String {
    region.to_uppercase().replace(['-', '.'], "_")
}

/// Build a Gemini-backed pool with one handle per region.
pub fn build_gemini_pool(
    regions: &[RegionConfig],
    gemini: &GeminiConfig,
    pool: AnalyzerPoolConfig,
) -> Result<AnalyzerPool, ConfigError> {
    let handles = regions
        .iter()
        .map(|region| {
            let analyzer = GeminiAnalyzer::new(gemini.clone(), region.api_key.clone())?;
            Ok(AnalyzerHandle::new(
                region.name.clone(),
                region.capacity,
                Arc::new(analyzer),
            ))
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    info!(
        regions = handles.len(),
        models = ?gemini.models,
        "Analyzer pool configured"
    );
    Ok(AnalyzerPool::new(handles, pool))
}

/// Build the pool from environment variables.
pub fn pool_from_env() -> Result<AnalyzerPool, ConfigError> {
    let regions = regions_from_env()?;
    build_gemini_pool(&regions, &GeminiConfig::from_env(), AnalyzerPoolConfig::from_env())
}
