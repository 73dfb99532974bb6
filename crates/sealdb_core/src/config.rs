//! Database configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default PBKDF2-HMAC-SHA256 iteration count.
pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;

/// Configuration for opening a sealed database.
#[derive(Debug, Clone)]
pub struct Config {
    /// PBKDF2 iteration count used to derive the key from the password.
    ///
    /// Changing this for an existing database makes the old password
    /// derive a different key, which fails as a wrong password.
    pub kdf_iterations: u32,

    /// Debounce delay used when a flush is requested automatically.
    pub flush_delay: Duration,

    /// Upper bound on how long debounce refreshing may postpone a flush,
    /// measured from the first request of a burst.
    pub max_flush_delay: Duration,

    /// Whether `execute` and `transaction` request a flush after mutating.
    pub auto_flush: bool,

    /// Directory for plaintext working copies. `None` uses
    /// `<system temp>/sealdb`.
    pub working_dir: Option<PathBuf>,

    /// Prefix for every key written to the settings store.
    pub settings_namespace: String,

    /// Consecutive flush failures after which a persistent warning is raised.
    pub failure_warning_threshold: u32,

    /// How long SQLite waits on a locked database before giving up.
    pub busy_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            flush_delay: Duration::from_secs(2),
            max_flush_delay: Duration::from_secs(30),
            auto_flush: true,
            working_dir: None,
            settings_namespace: "sealdb".to_string(),
            failure_warning_threshold: 3,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the PBKDF2 iteration count.
    #[must_use]
    pub const fn kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Sets the automatic flush debounce delay.
    #[must_use]
    pub const fn flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Sets the maximum debounce postponement.
    #[must_use]
    pub const fn max_flush_delay(mut self, delay: Duration) -> Self {
        self.max_flush_delay = delay;
        self
    }

    /// Sets whether mutating calls request a flush automatically.
    #[must_use]
    pub const fn auto_flush(mut self, value: bool) -> Self {
        self.auto_flush = value;
        self
    }

    /// Sets the working copy directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the settings key namespace.
    #[must_use]
    pub fn settings_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.settings_namespace = namespace.into();
        self
    }

    /// Sets the persistent-warning failure threshold.
    #[must_use]
    pub const fn failure_warning_threshold(mut self, failures: u32) -> Self {
        self.failure_warning_threshold = failures;
        self
    }

    /// Sets the SQLite busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Returns the working copy directory, resolving the default.
    #[must_use]
    pub fn resolved_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sealdb"))
    }

    /// Returns the fully qualified settings key for `name`.
    #[must_use]
    pub fn settings_key(&self, name: &str) -> String {
        format!("{}.{name}", self.settings_namespace)
    }
}
