//! Content analyzers and the regional analyzer pool.
//!
//! - [`Analyzer`]: the contract every backend implements
//! - [`GeminiAnalyzer`]: Gemini `generateContent` backend
//! - [`AnalyzerPool`]: bounded, health-aware selection across regions

pub mod analyzer;
pub mod circuit;
pub mod config;
pub mod error;
pub mod gemini;
pub mod metrics;
pub mod pool;
pub mod testing;

pub use analyzer::Analyzer;
pub use circuit::{CircuitBreaker, CircuitState};
pub use config::{build_gemini_pool, pool_from_env, regions_from_env, ConfigError, RegionConfig};
pub use error::{AnalyzerError, AnalyzerResult, PoolError, PoolResult};
pub use gemini::{GeminiAnalyzer, GeminiConfig};
pub use pool::{AnalyzerHandle, AnalyzerPool, AnalyzerPoolConfig, HandleStatus, PoolLease};
