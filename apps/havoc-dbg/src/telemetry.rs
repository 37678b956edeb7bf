pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::io::IsTerminal;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    /// Debugger output owns stdout, so logs go to stderr or `--log-file`.
    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        let filter = std::env::var("HAVOC_LOG_FILTER")
            .unwrap_or_else(|_| default_filter(config.level));

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::stderr()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(config.level >= LogLevel::Debug)
            .with_ansi(config.file.is_none() && std::io::stderr().is_terminal())
            .with_writer(writer)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    /// HTTP and TLS crates stay at `warn` whatever the level; raising the
    /// level only opens up the debugger's own targets.
    fn default_filter(level: LogLevel) -> String {
        if level <= LogLevel::Warn {
            return level.as_str().to_owned();
        }
        let level = level.as_str();
        ["havoc", "havoc_dbg", "havoc_debug_sdk", "havoc_replay_sim"]
            .iter()
            .fold(String::from("warn"), |mut filter, target| {
                filter.push_str(&format!(",{target}={level}"));
                filter
            })
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn quiet_levels_apply_everywhere() {
            assert_eq!(default_filter(LogLevel::Warn), "warn");
            assert_eq!(default_filter(LogLevel::Error), "error");
        }

        #[test]
        fn verbose_levels_only_open_havoc_targets() {
            let filter = default_filter(LogLevel::Debug);
            assert!(filter.starts_with("warn,"));
            assert!(filter.contains("havoc=debug"));
            assert!(filter.contains("havoc_replay_sim=debug"));
            assert!(!filter.contains("reqwest"));
        }
    }
}
