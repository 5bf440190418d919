use log::Record;
use log4rs::{
    append::{
        console::ConsoleAppender,
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
    filter::{Filter, Response},
};

use crate::config::Config;

const FILE_SIZE_LIMIT: u64 = 50_000_000;
const ARCHIVED_LOG_COUNT: u32 = 8;
const LOG_PATTERN: &str = "[{d(%H:%M:%S)} {l}]: {m}{n}";

/// Sets up log4rs for an application embedding this workspace. Must be called
/// after `Config::init`.
pub fn init_logger() -> anyhow::Result<()> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let roller = FixedWindowRoller::builder()
        .build("logs/history.{}.log.old", ARCHIVED_LOG_COUNT)
        .map_err(|error| anyhow::anyhow!("Failed to build log roller: {error}"))?;

    let log_file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build(
            "logs/latest.log",
            Box::new(CompoundPolicy::new(
                Box::new(SizeTrigger::new(FILE_SIZE_LIMIT)),
                Box::new(roller),
            )),
        )?;

    let config = LogConfig::builder()
        .appender(
            Appender::builder()
                .filter(Box::new(CrateFilter))
                .build("console", Box::new(console)),
        )
        .appender(
            Appender::builder()
                .filter(Box::new(CrateFilter))
                .build("log_file", Box::new(log_file)),
        )
        .build(
            Root::builder()
                .appender("console")
                .appender("log_file")
                .build(Config::get().log_level_filter),
        )?;

    log4rs::init_config(config)?;

    Ok(())
}

// Only allow logging from our own crates
#[derive(Debug)]
struct CrateFilter;

impl Filter for CrateFilter {
    fn filter(&self, record: &Record) -> Response {
        match record.module_path() {
            Some(path) => {
                if ["common", "entity", "rest", "history"]
                    .iter()
                    .any(|&krate| path.starts_with(krate))
                {
                    Response::Accept
                } else {
                    Response::Reject
                }
            }
            None => Response::Reject,
        }
    }
}
