use anyhow::Result;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration.
///
/// Merge order is defaults <- config file <- env vars <- CLI, the same
/// precedence every binary in this workspace uses. Env vars carry a
/// `SNAPGREP_` prefix.
#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind_addr: String,
    pub cache_dir: PathBuf,
    pub max_cache_bytes: u64,
    pub max_file_size: u64,
    pub large_file_patterns: Vec<String>,
    /// Upstream tar service endpoints. The fetch limiter capacity is
    /// periodically recomputed from this list.
    pub fetch_endpoints: Vec<String>,
    pub fetch_concurrency_per_endpoint: usize,
    /// When set, archives come from `git archive` against mirrors under
    /// this root instead of the HTTP endpoints (dev mode).
    pub git_mirror_root: Option<PathBuf>,
    pub max_search_duration: Duration,
    pub eviction_interval: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3480".into(),
            cache_dir: std::env::temp_dir().join("snapgrep-cache"),
            max_cache_bytes: 10 * 1024 * 1024 * 1024,
            max_file_size: 1_000_000,
            large_file_patterns: Vec::new(),
            fetch_endpoints: Vec::new(),
            fetch_concurrency_per_endpoint: 4,
            git_mirror_root: None,
            max_search_duration: Duration::from_secs(10),
            eviction_interval: Duration::from_secs(30),
        }
    }
}

impl ServeConfig {
    /// Total limiter capacity for the configured endpoint set.
    pub fn fetch_limit(&self) -> usize {
        self.fetch_endpoints.len().max(1) * self.fetch_concurrency_per_endpoint.max(1)
    }
}

/// CLI-level options that binaries pass to `load_config`.
/// Keep this small and explicit; binaries can expand for extra fields.
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<PathBuf>,
    pub cli_bind_addr: Option<String>,
    pub cli_cache_dir: Option<PathBuf>,
    pub cli_max_cache_bytes: Option<u64>,
    pub cli_git_mirror_root: Option<PathBuf>,
}

/// Load and merge ServeConfig from: defaults <- config file <- env vars <- CLI
pub fn load_config(mut base: ServeConfig, opts: MergeOpts) -> Result<ServeConfig> {
    if let Some(path) = opts.config_path.as_ref() {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            let v: toml::Value = toml::from_str(&s)?;
            if let Some(addr) = v.get("bind_addr").and_then(|x| x.as_str()) {
                base.bind_addr = addr.to_string();
            }
            if let Some(dir) = v.get("cache_dir").and_then(|x| x.as_str()) {
                base.cache_dir = PathBuf::from(dir);
            }
            if let Some(n) = v.get("max_cache_bytes").and_then(|x| x.as_integer()) {
                base.max_cache_bytes = n as u64;
            }
            if let Some(n) = v.get("max_file_size").and_then(|x| x.as_integer()) {
                base.max_file_size = n as u64;
            }
            if let Some(arr) = v.get("large_file_patterns").and_then(|x| x.as_array()) {
                base.large_file_patterns = arr
                    .iter()
                    .filter_map(|x| x.as_str().map(|s| s.to_string()))
                    .collect();
            }
            if let Some(arr) = v.get("fetch_endpoints").and_then(|x| x.as_array()) {
                base.fetch_endpoints = arr
                    .iter()
                    .filter_map(|x| x.as_str().map(|s| s.to_string()))
                    .collect();
            }
            if let Some(n) = v
                .get("fetch_concurrency_per_endpoint")
                .and_then(|x| x.as_integer())
            {
                base.fetch_concurrency_per_endpoint = n as usize;
            }
            if let Some(dir) = v.get("git_mirror_root").and_then(|x| x.as_str()) {
                base.git_mirror_root = Some(PathBuf::from(dir));
            }
            if let Some(n) = v.get("max_search_seconds").and_then(|x| x.as_integer()) {
                base.max_search_duration = Duration::from_secs(n as u64);
            }
            if let Some(n) = v.get("eviction_interval_seconds").and_then(|x| x.as_integer()) {
                base.eviction_interval = Duration::from_secs(n as u64);
            }
        }
    }

    // env vars override file
    if let Ok(addr) = std::env::var("SNAPGREP_BIND_ADDR") {
        base.bind_addr = addr;
    }
    if let Ok(dir) = std::env::var("SNAPGREP_CACHE_DIR") {
        base.cache_dir = PathBuf::from(dir);
    }
    if let Ok(s) = std::env::var("SNAPGREP_MAX_CACHE_BYTES") {
        if let Ok(n) = s.parse::<u64>() {
            base.max_cache_bytes = n;
        }
    }
    if let Ok(s) = std::env::var("SNAPGREP_MAX_FILE_SIZE") {
        if let Ok(n) = s.parse::<u64>() {
            base.max_file_size = n;
        }
    }
    if let Ok(s) = std::env::var("SNAPGREP_FETCH_ENDPOINTS") {
        base.fetch_endpoints = s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Ok(s) = std::env::var("SNAPGREP_FETCH_CONCURRENCY_PER_ENDPOINT") {
        if let Ok(n) = s.parse::<usize>() {
            base.fetch_concurrency_per_endpoint = n;
        }
    }
    if let Ok(dir) = std::env::var("SNAPGREP_GIT_MIRROR_ROOT") {
        base.git_mirror_root = Some(PathBuf::from(dir));
    }
    if let Ok(s) = std::env::var("SNAPGREP_MAX_SEARCH_SECONDS") {
        if let Ok(n) = s.parse::<u64>() {
            base.max_search_duration = Duration::from_secs(n);
        }
    }
    if let Ok(s) = std::env::var("SNAPGREP_EVICTION_INTERVAL_SECONDS") {
        if let Ok(n) = s.parse::<u64>() {
            base.eviction_interval = Duration::from_secs(n);
        }
    }

    // CLI overrides everything
    if let Some(addr) = opts.cli_bind_addr {
        base.bind_addr = addr;
    }
    if let Some(dir) = opts.cli_cache_dir {
        base.cache_dir = dir;
    }
    if let Some(n) = opts.cli_max_cache_bytes {
        base.max_cache_bytes = n;
    }
    if let Some(dir) = opts.cli_git_mirror_root {
        base.git_mirror_root = Some(dir);
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    fn init_test_logging() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(|| {
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        });
    }

    fn clear_env() {
        for var in [
            "SNAPGREP_BIND_ADDR",
            "SNAPGREP_CACHE_DIR",
            "SNAPGREP_MAX_CACHE_BYTES",
            "SNAPGREP_MAX_FILE_SIZE",
            "SNAPGREP_FETCH_ENDPOINTS",
            "SNAPGREP_FETCH_CONCURRENCY_PER_ENDPOINT",
            "SNAPGREP_GIT_MIRROR_ROOT",
            "SNAPGREP_MAX_SEARCH_SECONDS",
            "SNAPGREP_EVICTION_INTERVAL_SECONDS",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial_test::serial]
    fn file_env_cli_precedence() {
        init_test_logging();
        clear_env();

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let toml = r#"
bind_addr = "0.0.0.0:1111"
max_cache_bytes = 1000
"#;
        fs::write(tmp.path(), toml).unwrap();

        std::env::set_var("SNAPGREP_BIND_ADDR", "0.0.0.0:2222");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            cli_bind_addr: Some("0.0.0.0:3333".into()),
            ..Default::default()
        };
        let got = load_config(ServeConfig::default(), opts).expect("load");
        // CLI wins for bind_addr, file wins where env/CLI are silent.
        assert_eq!(got.bind_addr, "0.0.0.0:3333");
        assert_eq!(got.max_cache_bytes, 1000);

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_file() {
        init_test_logging();
        clear_env();

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), "max_cache_bytes = 1000\n").unwrap();
        std::env::set_var("SNAPGREP_MAX_CACHE_BYTES", "2000");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let got = load_config(ServeConfig::default(), opts).expect("load");
        assert_eq!(got.max_cache_bytes, 2000);

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn invalid_env_is_ignored() {
        init_test_logging();
        clear_env();

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), "max_cache_bytes = 4096\n").unwrap();
        std::env::set_var("SNAPGREP_MAX_CACHE_BYTES", "not-a-number");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let got = load_config(ServeConfig::default(), opts).expect("load");
        assert_eq!(got.max_cache_bytes, 4096);

        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn endpoint_list_parses_from_env() {
        init_test_logging();
        clear_env();

        std::env::set_var(
            "SNAPGREP_FETCH_ENDPOINTS",
            "http://a:3178, http://b:3178 ,,",
        );
        let got = load_config(ServeConfig::default(), MergeOpts::default()).expect("load");
        assert_eq!(got.fetch_endpoints, vec!["http://a:3178", "http://b:3178"]);
        assert_eq!(got.fetch_limit(), 8);

        clear_env();
    }
}
