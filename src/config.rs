// ⚙️ Configuration - environment driven, test-friendly defaults
//
// Every knob is an ISSUER_MASTER_* variable. `Config::default()` is what the
// tests use; `Config::from_env()` overlays whatever the environment sets.

use std::path::PathBuf;
use std::time::Duration;

use crate::delta::DeltaTarget;
use crate::detail::DetailSpec;
use crate::error::{Error, Result};
use crate::store::RetryPolicy;

const PREFIX: &str = "ISSUER_MASTER_";

// ============================================================================
// REMOTE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub endpoint: String,
    /// Repository id, e.g. `org/issuer-master`.
    pub repo: String,
    pub revision: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            endpoint: "https://huggingface.co".to_string(),
            repo: String::new(),
            revision: "main".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub remote: RemoteConfig,
    pub retry: RetryPolicy,
    /// Max ops per remote commit.
    pub commit_batch_size: usize,
    /// Local staging root for worker deltas.
    pub data_dir: PathBuf,
    /// Remote (and local, under data_dir) prefix for deltas.
    pub staging_prefix: String,
    pub delta_target: DeltaTarget,
    /// Extra remote listing attempts while a run's staging dir looks empty.
    pub list_retries: u32,
    pub list_retry_delay: Duration,
    /// Source name whose rows are authoritative for status/sector/market.
    pub baseline_source: String,
    pub delta_ttl: Duration,
    /// Non-top-level files re-read after commit.
    pub verify_sample: usize,
    pub detail_specs: Vec<DetailSpec>,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            remote: RemoteConfig::default(),
            retry: RetryPolicy::default(),
            commit_batch_size: 200,
            data_dir: PathBuf::from("./data"),
            staging_prefix: "temp/deltas".to_string(),
            delta_target: DeltaTarget::Local,
            list_retries: 3,
            list_retry_delay: Duration::from_secs(5),
            baseline_source: "exchange_listing".to_string(),
            delta_ttl: Duration::from_secs(24 * 3600),
            verify_sample: 16,
            detail_specs: DetailSpec::defaults(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(endpoint) = env_string("ENDPOINT") {
            config.remote.endpoint = endpoint;
        }
        if let Some(repo) = env_string("REPO") {
            config.remote.repo = repo;
        }
        if let Some(revision) = env_string("REVISION") {
            config.remote.revision = revision;
        }
        config.remote.token = env_string("TOKEN");
        if let Some(secs) = env_u64("CONNECT_TIMEOUT_SECS")? {
            config.remote.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("READ_TIMEOUT_SECS")? {
            config.remote.read_timeout = Duration::from_secs(secs);
        }

        if let Some(n) = env_u64("MAX_ATTEMPTS")? {
            config.retry.max_attempts = to_u32("MAX_ATTEMPTS", n)?;
        }
        if let Some(n) = env_u64("MAX_CONFLICT_ATTEMPTS")? {
            config.retry.max_conflict_attempts = to_u32("MAX_CONFLICT_ATTEMPTS", n)?;
        }
        if let Some(ms) = env_u64("BASE_DELAY_MS")? {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("MAX_DELAY_MS")? {
            config.retry.max_delay = Duration::from_millis(ms);
        }

        if let Some(n) = env_u64("BATCH_SIZE")? {
            if n == 0 {
                return Err(Error::Config(format!("{PREFIX}BATCH_SIZE must be at least 1")));
            }
            config.commit_batch_size = n as usize;
        }
        if let Some(dir) = env_string("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(prefix) = env_string("STAGING_PREFIX") {
            config.staging_prefix = prefix.trim_matches('/').to_string();
        }
        if let Some(target) = env_string("DELTA_TARGET") {
            config.delta_target = DeltaTarget::parse(&target).ok_or_else(|| {
                Error::Config(format!("{PREFIX}DELTA_TARGET must be 'local' or 'remote', got '{target}'"))
            })?;
        }
        if let Some(n) = env_u64("LIST_RETRIES")? {
            config.list_retries = to_u32("LIST_RETRIES", n)?;
        }
        if let Some(source) = env_string("BASELINE_SOURCE") {
            config.baseline_source = source;
        }
        if let Some(hours) = env_u64("DELTA_TTL_HOURS")? {
            config.delta_ttl = Duration::from_secs(hours * 3600);
        }
        if let Some(n) = env_u64("VERIFY_SAMPLE")? {
            config.verify_sample = n as usize;
        }
        if let Some(filter) = env_string("LOG") {
            config.log_filter = filter;
        }

        Ok(config)
    }

    /// Local directory that mirrors the remote staging prefix.
    pub fn local_staging_root(&self) -> PathBuf {
        self.data_dir.join(&self.staging_prefix)
    }
}

// ============================================================================
// ENV HELPERS
// ============================================================================

fn env_string(name: &str) -> Option<String> {
    std::env::var(format!("{PREFIX}{name}")).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{PREFIX}{name} must be a non-negative integer: {e}")))
}

fn to_u32(name: &str, n: u64) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::Config(format!("{PREFIX}{name} is too large")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.commit_batch_size, 200);
        assert_eq!(config.staging_prefix, "temp/deltas");
        assert_eq!(config.delta_target, DeltaTarget::Local);
        assert_eq!(config.delta_ttl, Duration::from_secs(86_400));
        assert_eq!(config.local_staging_root(), PathBuf::from("./data/temp/deltas"));
        assert!(!config.detail_specs.is_empty());
    }

    // Env-var tests share process state; keep them in a single test.
    #[test]
    fn test_from_env_overrides_and_validation() {
        std::env::set_var("ISSUER_MASTER_REPO", "acme/issuers");
        std::env::set_var("ISSUER_MASTER_BATCH_SIZE", "50");
        std::env::set_var("ISSUER_MASTER_DELTA_TARGET", "remote");
        std::env::set_var("ISSUER_MASTER_STAGING_PREFIX", "/tmp-deltas/");

        let config = Config::from_env().unwrap();
        assert_eq!(config.remote.repo, "acme/issuers");
        assert_eq!(config.commit_batch_size, 50);
        assert_eq!(config.delta_target, DeltaTarget::Remote);
        assert_eq!(config.staging_prefix, "tmp-deltas");

        std::env::set_var("ISSUER_MASTER_BATCH_SIZE", "zero");
        assert!(Config::from_env().is_err());
        std::env::set_var("ISSUER_MASTER_BATCH_SIZE", "0");
        assert!(Config::from_env().is_err());

        for key in [
            "ISSUER_MASTER_REPO",
            "ISSUER_MASTER_BATCH_SIZE",
            "ISSUER_MASTER_DELTA_TARGET",
            "ISSUER_MASTER_STAGING_PREFIX",
        ] {
            std::env::remove_var(key);
        }
    }
}
