use course_core::model::DEFAULT_WATCH_COMPLETION_THRESHOLD;

/// Tunables for the progression engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Watch completion percentage at which a watch record is flagged completed.
    pub watch_completion_threshold: u8,
    /// Attempts at the version-checked progress write before giving up.
    pub max_write_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            watch_completion_threshold: DEFAULT_WATCH_COMPLETION_THRESHOLD,
            max_write_attempts: 3,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `GATE_WATCH_COMPLETION_THRESHOLD` and
    /// `GATE_MAX_WRITE_ATTEMPTS`. Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let threshold = read(&lookup, "GATE_WATCH_COMPLETION_THRESHOLD")
            .unwrap_or(defaults.watch_completion_threshold);
        let attempts =
            read(&lookup, "GATE_MAX_WRITE_ATTEMPTS").unwrap_or(defaults.max_write_attempts);
        defaults
            .with_watch_completion_threshold(threshold)
            .with_max_write_attempts(attempts)
    }

    /// Clamped to 0..=100.
    #[must_use]
    pub fn with_watch_completion_threshold(mut self, threshold: u8) -> Self {
        self.watch_completion_threshold = threshold.min(100);
        self
    }

    /// At least one attempt is always made.
    #[must_use]
    pub fn with_max_write_attempts(mut self, attempts: u32) -> Self {
        self.max_write_attempts = attempts.max(1);
        self
    }
}

fn read<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
