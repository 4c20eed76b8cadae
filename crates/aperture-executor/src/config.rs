//! Isolation configuration (specification §4.10 "Configuration (isolation
//! config)"), grounded on the original `types.hpp::IsolationConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// How strongly an executed script is isolated from the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// No isolation; not implemented by this executor (no embedded
    /// interpreter exists to run against) but kept as a configuration value
    /// so callers that model three levels compile against one enum.
    None,
    /// Separate process, no extra resource limits applied before exec.
    Subprocess,
    /// Separate process with `max_memory_mb` enforced via `setrlimit(AS)`
    /// (POSIX) before exec, or a post-spawn RSS watchdog (Windows).
    Sandboxed,
}

/// Full isolation configuration for one execution (specification §4.10).
#[derive(Debug, Clone)]
pub struct IsolationConfig {
    pub level: IsolationLevel,

    pub max_memory_mb: u64,
    pub max_cpu_percent: u8,
    /// Default deadline used when a caller doesn't set `timeout_s` on the
    /// `Execute` request itself; the request-level value always wins when
    /// present, since one executor instance may run several scripts with
    /// different budgets over its lifetime.
    pub timeout: Duration,

    pub allow_network: bool,
    pub allow_filesystem: bool,
    pub allowed_paths: Vec<PathBuf>,
    pub allowed_imports: Vec<String>,
    pub blocked_imports: Vec<String>,

    pub working_directory: Option<PathBuf>,
    pub executor_path: Option<PathBuf>,
    pub worker_path: Option<PathBuf>,
    pub extra_path: Vec<PathBuf>,
    pub environment: HashMap<String, String>,
    pub inherit_environment: bool,

    pub capture_output: bool,
    pub enable_profiling: bool,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            level: IsolationLevel::Subprocess,
            max_memory_mb: 512,
            max_cpu_percent: 100,
            timeout: Duration::from_secs(300),
            allow_network: false,
            allow_filesystem: true,
            allowed_paths: Vec::new(),
            allowed_imports: Vec::new(),
            blocked_imports: Vec::new(),
            working_directory: None,
            executor_path: None,
            worker_path: None,
            extra_path: Vec::new(),
            environment: HashMap::new(),
            inherit_environment: true,
            capture_output: true,
            enable_profiling: false,
        }
    }
}

impl IsolationConfig {
    /// Minimal isolation for short, trusted scripts: no memory cap, a short
    /// timeout, no sandboxing overhead. Mirrors the original
    /// `RunnerFactory::createQuick` intent (a fast path for throwaway
    /// snippets); the concrete limits are this workspace's own judgment
    /// since the original implementation of the factory methods wasn't
    /// part of the retrieved source.
    pub fn quick() -> Self {
        Self {
            level: IsolationLevel::Subprocess,
            max_memory_mb: 0,
            timeout: Duration::from_secs(10),
            allow_network: true,
            allow_filesystem: true,
            ..Self::default()
        }
    }

    /// Maximum security: sandboxed, no network, filesystem restricted to
    /// an explicit allow-list, tight memory ceiling.
    pub fn secure() -> Self {
        Self {
            level: IsolationLevel::Sandboxed,
            max_memory_mb: 128,
            max_cpu_percent: 50,
            timeout: Duration::from_secs(30),
            allow_network: false,
            allow_filesystem: false,
            inherit_environment: false,
            ..Self::default()
        }
    }

    /// Tuned for long-running scientific computation: generous memory and
    /// wall clock, filesystem access for data files, network still denied
    /// by default.
    pub fn scientific() -> Self {
        Self {
            level: IsolationLevel::Sandboxed,
            max_memory_mb: 8192,
            max_cpu_percent: 100,
            timeout: Duration::from_secs(3600),
            allow_network: false,
            allow_filesystem: true,
            ..Self::default()
        }
    }

    /// Basic self-consistency checks, performed before spawn so
    /// configuration mistakes surface as `InvalidArgument` rather than a
    /// spawn failure deep in the process-launch path.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout.is_zero() {
            return Err("timeout must be greater than zero".into());
        }
        if self.max_cpu_percent > 100 {
            return Err(format!(
                "max_cpu_percent {} exceeds 100",
                self.max_cpu_percent
            ));
        }
        if matches!(self.level, IsolationLevel::Sandboxed) && self.max_memory_mb == 0 {
            return Err("sandboxed isolation requires a nonzero max_memory_mb".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_subprocess_with_modest_limits() {
        let cfg = IsolationConfig::default();
        assert_eq!(cfg.level, IsolationLevel::Subprocess);
        assert_eq!(cfg.max_memory_mb, 512);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn quick_has_no_memory_limit_and_short_timeout() {
        let cfg = IsolationConfig::quick();
        assert_eq!(cfg.max_memory_mb, 0);
        assert_eq!(cfg.timeout, Duration::from_secs(10));
    }

    #[test]
    fn secure_denies_network_and_filesystem() {
        let cfg = IsolationConfig::secure();
        assert!(!cfg.allow_network);
        assert!(!cfg.allow_filesystem);
        assert_eq!(cfg.level, IsolationLevel::Sandboxed);
    }

    #[test]
    fn sandboxed_with_zero_memory_limit_fails_validation() {
        let mut cfg = IsolationConfig::secure();
        cfg.max_memory_mb = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let mut cfg = IsolationConfig::quick();
        cfg.timeout = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
