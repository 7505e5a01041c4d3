use std::time::{Duration, Instant};

use log::LevelFilter;

// Yes these look silly. `tracing` doesn't currently support dynamic levels
// https://github.com/tokio-rs/tracing/issues/372
#[doc(hidden)]
#[macro_export]
macro_rules! private_tracing_dynamic_enabled {
    (target: $target:expr, $level:expr) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::enabled!(target: $target, Level::ERROR),
            Level::WARN => ::tracing::enabled!(target: $target, Level::WARN),
            Level::INFO => ::tracing::enabled!(target: $target, Level::INFO),
            Level::DEBUG => ::tracing::enabled!(target: $target, Level::DEBUG),
            Level::TRACE => ::tracing::enabled!(target: $target, Level::TRACE),
        }
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! private_tracing_dynamic_event {
    (target: $target:expr, $level:expr, $($args:tt)*) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::event!(target: $target, Level::ERROR, $($args)*),
            Level::WARN => ::tracing::event!(target: $target, Level::WARN, $($args)*),
            Level::INFO => ::tracing::event!(target: $target, Level::INFO, $($args)*),
            Level::DEBUG => ::tracing::event!(target: $target, Level::DEBUG, $($args)*),
            Level::TRACE => ::tracing::event!(target: $target, Level::TRACE, $($args)*),
        }
    }};
}

#[doc(hidden)]
pub fn private_level_filter_to_levels(filter: LevelFilter) -> Option<(tracing::Level, log::Level)> {
    let tracing_level = match filter {
        LevelFilter::Error => Some(tracing::Level::ERROR),
        LevelFilter::Warn => Some(tracing::Level::WARN),
        LevelFilter::Info => Some(tracing::Level::INFO),
        LevelFilter::Debug => Some(tracing::Level::DEBUG),
        LevelFilter::Trace => Some(tracing::Level::TRACE),
        LevelFilter::Off => None,
    };

    tracing_level.zip(filter.to_level())
}

/// Levels at which executed statements are logged.
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub statements_level: LevelFilter,
    pub slow_statements_level: LevelFilter,
    pub slow_statements_duration: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            statements_level: LevelFilter::Debug,
            slow_statements_level: LevelFilter::Warn,
            slow_statements_duration: Duration::from_secs(1),
        }
    }
}

impl LogSettings {
    pub fn log_statements(&mut self, level: LevelFilter) {
        self.statements_level = level;
    }

    pub fn log_slow_statements(&mut self, level: LevelFilter, duration: Duration) {
        self.slow_statements_level = level;
        self.slow_statements_duration = duration;
    }
}

/// Times one statement from dispatch to completion.
#[derive(Debug)]
pub(crate) struct QueryLogger {
    start: Instant,
}

impl QueryLogger {
    pub fn new() -> Self {
        QueryLogger {
            start: Instant::now(),
        }
    }

    pub fn finish(&self, sql: &str, failed: bool, settings: &LogSettings) {
        let elapsed = self.start.elapsed();

        let was_slow = elapsed >= settings.slow_statements_duration;

        let lvl = if was_slow {
            settings.slow_statements_level
        } else {
            settings.statements_level
        };

        let Some((tracing_level, log_level)) = private_level_filter_to_levels(lvl) else {
            return;
        };

        // The enabled level could be set from either tracing world or log world, so check both
        // to see if logging should be enabled for our level
        let log_is_enabled = log::log_enabled!(target: "pgdispatch::query", log_level)
            || private_tracing_dynamic_enabled!(target: "pgdispatch::query", tracing_level);
        if !log_is_enabled {
            return;
        }

        let mut summary = parse_query_summary(sql);

        let sql = if summary != sql {
            summary.push_str(" …");
            format!("\n\n{sql}\n")
        } else {
            String::new()
        };

        if was_slow {
            private_tracing_dynamic_event!(
                target: "pgdispatch::query",
                tracing_level,
                summary,
                db.statement = sql,
                failed,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
                slow_threshold = ?settings.slow_statements_duration,
                "slow statement: execution time exceeded alert threshold"
            );
        } else {
            private_tracing_dynamic_event!(
                target: "pgdispatch::query",
                tracing_level,
                summary,
                db.statement = sql,
                failed,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
            );
        }
    }
}

pub fn parse_query_summary(sql: &str) -> String {
    // For now, just take the first 4 words
    sql.split_whitespace()
        .take(4)
        .collect::<Vec<&str>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_takes_first_four_words() {
        assert_eq!(
            parse_query_summary("SELECT id, name\n  FROM users WHERE id = 1"),
            "SELECT id, name FROM"
        );
        assert_eq!(parse_query_summary("SELECT NOW()"), "SELECT NOW()");
    }

    #[test]
    fn off_disables_both_worlds() {
        assert!(private_level_filter_to_levels(LevelFilter::Off).is_none());
        assert_eq!(
            private_level_filter_to_levels(LevelFilter::Warn),
            Some((tracing::Level::WARN, log::Level::Warn))
        );
    }
}
