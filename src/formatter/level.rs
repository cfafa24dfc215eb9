use crate::config::LogLevelConfig;
use crate::stream_processor::StreamKind;
use std::collections::HashMap;
use std::sync::Mutex;

/// Lines longer than this are never memoized.
const MAX_CACHED_LINE_LENGTH: usize = 1024;

/// Number of memoized lines. Reaching it clears the whole cache.
const CACHE_CAPACITY: usize = 1000;

/// Position of a level in the detection order. Unknown levels come last.
fn severity_rank(level: &str) -> usize {
    match level {
        "FATAL" => 0,
        "ERROR" => 1,
        "WARN" => 2,
        "DEBUG" => 3,
        "TRACE" => 4,
        "INFO" => 5,
        _ => 6,
    }
}

/// Derives the level of a line from the keywords it contains.
///
/// Levels are checked from most to least severe, the first level with a keyword contained in the
/// line (ignoring case) wins. Lines without a match get the default level of their stream.
#[derive(Debug)]
pub(crate) struct LevelDetector {
    enabled: bool,
    /// Upper-cased level with its upper-cased keywords, in detection order.
    keywords: Vec<(String, Vec<String>)>,
    default_stdout: String,
    default_stderr: String,
    cache: Mutex<HashMap<(String, StreamKind), String>>,
}

impl LevelDetector {
    pub(crate) fn new(config: &LogLevelConfig) -> Self {
        let mut keywords: Vec<(String, Vec<String>)> = config
            .detection
            .effective_keywords()
            .into_iter()
            .map(|(level, keywords)| {
                (
                    level.to_uppercase(),
                    keywords.iter().map(|k| k.to_uppercase()).collect(),
                )
            })
            .collect();
        // Stable, so levels of equal rank keep their (alphabetical) map order.
        keywords.sort_by_key(|(level, _)| severity_rank(level));

        Self {
            enabled: config.detection.enabled,
            keywords,
            default_stdout: config.default_stdout.clone(),
            default_stderr: config.default_stderr.clone(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn detect(&self, line: &str, kind: StreamKind) -> String {
        if !self.enabled {
            return self.default_for(kind).to_string();
        }
        if line.len() > MAX_CACHED_LINE_LENGTH {
            return self.scan(line, kind);
        }

        let key = (line.to_string(), kind);
        if let Some(level) = self.lock_cache().get(&key) {
            return level.clone();
        }

        let level = self.scan(line, kind);
        let mut cache = self.lock_cache();
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(key, level.clone());
        level
    }

    fn scan(&self, line: &str, kind: StreamKind) -> String {
        let line = line.to_uppercase();
        self.keywords
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| line.contains(k.as_str())))
            .map(|(level, _)| level.clone())
            .unwrap_or_else(|| self.default_for(kind).to_string())
    }

    fn default_for(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Stdout => &self.default_stdout,
            StreamKind::Stderr => &self.default_stderr,
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<(String, StreamKind), String>> {
        match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn cached_lines(&self) -> usize {
        self.lock_cache().len()
    }
}
