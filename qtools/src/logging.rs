use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Command line switches of the log level, shared by the binaries.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct LogArgs {
    /// Print informational messages
    #[arg(long)]
    pub verbose: bool,
    /// Print only errors
    #[arg(long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,
    /// Print debug messages
    #[arg(long)]
    pub debug: bool,
}

impl LogArgs {
    pub fn level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Debug
        } else if self.verbose {
            LevelFilter::Info
        } else if self.quiet {
            LevelFilter::Error
        } else {
            LevelFilter::Warn
        }
    }
}

/// Install the logger of the binaries. `RUST_LOG` overrides the given level.
pub fn setup_logger(level: LevelFilter) {
    let mut builder = Builder::new();

    builder
        .format_timestamp_millis()
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level()).bold();

            writeln!(
                buf,
                "{} - [{level_style}{:5}{level_style:#}] {}:{} - {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or_default(),
                record.line().unwrap_or_default(),
                record.args()
            )
        })
        .filter_level(level)
        .parse_default_env()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_is_warn() {
        assert_eq!(LogArgs::default().level(), LevelFilter::Warn);
    }

    #[test]
    fn debug_wins_over_verbose() {
        let args = LogArgs {
            verbose: true,
            debug: true,
            ..Default::default()
        };

        assert_eq!(args.level(), LevelFilter::Debug);
    }
}
