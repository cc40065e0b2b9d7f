// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Runtime configuration for an [`EntryPoint`](crate::EntryPoint).

use std::time::Duration;

/// Environment variable selecting the native backend (`soft` or `wgpu`).
pub const BACKEND_VAR: &str = "HOST_GPU_BACKEND";
/// Environment variable overriding [`BridgeConfig::map_timeout`], in milliseconds.
pub const MAP_TIMEOUT_VAR: &str = "HOST_GPU_MAP_TIMEOUT_MS";
/// Environment variable overriding [`BridgeConfig::poll_interval`], in milliseconds.
pub const POLL_INTERVAL_VAR: &str = "HOST_GPU_POLL_INTERVAL_MS";

const DEFAULT_MAP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Which native driver an entry point binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// The in-memory software driver. Always available.
    Software,
    /// The wgpu driver. Requires the `backend_wgpu` feature.
    Wgpu,
}

impl BackendKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "soft" | "software" => Some(BackendKind::Software),
            "wgpu" => Some(BackendKind::Wgpu),
            _ => None,
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "backend_wgpu") {
            BackendKind::Wgpu
        } else {
            BackendKind::Software
        }
    }
}

/// Tunables for the bridge between the host and the native driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// The native driver to bind.
    pub backend: BackendKind,
    /// Upper bound on how long a blocking or async map waits for the driver.
    pub map_timeout: Duration,
    /// How long a map wait sleeps between device ticks.
    pub poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            backend: BackendKind::default(),
            map_timeout: DEFAULT_MAP_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl BridgeConfig {
    /// Reads overrides from the process environment, falling back to defaults.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads overrides through `lookup`, falling back to defaults.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = BridgeConfig::default();
        if let Some(value) = lookup(BACKEND_VAR) {
            match BackendKind::parse(&value) {
                Some(backend) => config.backend = backend,
                None => logwise::warn_sync!(
                    "ignoring unknown backend {value} from environment",
                    value = value
                ),
            }
        }
        if let Some(millis) = lookup(MAP_TIMEOUT_VAR).and_then(|v| parse_millis(MAP_TIMEOUT_VAR, &v)) {
            config.map_timeout = millis;
        }
        if let Some(millis) = lookup(POLL_INTERVAL_VAR).and_then(|v| parse_millis(POLL_INTERVAL_VAR, &v)) {
            config.poll_interval = millis;
        }
        config
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_map_timeout(mut self, timeout: Duration) -> Self {
        self.map_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn parse_millis(key: &str, value: &str) -> Option<Duration> {
    match value.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            logwise::warn_sync!(
                "ignoring non-numeric {key}={value}",
                key = key.to_string(),
                value = value.to_string()
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = BridgeConfig::from_lookup(|_| None);
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn overrides_are_applied() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            (BACKEND_VAR, "soft"),
            (MAP_TIMEOUT_VAR, "250"),
            (POLL_INTERVAL_VAR, "1"),
        ]));
        assert_eq!(config.backend, BackendKind::Software);
        assert_eq!(config.map_timeout, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_millis(1));
    }

    #[test]
    fn bad_values_fall_back() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            (BACKEND_VAR, "metal"),
            (MAP_TIMEOUT_VAR, "soon"),
        ]));
        assert_eq!(config.backend, BackendKind::default());
        assert_eq!(config.map_timeout, DEFAULT_MAP_TIMEOUT);
    }
}
