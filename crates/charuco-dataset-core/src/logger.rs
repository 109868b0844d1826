//! Stderr logger for the pipeline binaries.
//!
//! Lines look like `[  1.234s  INFO calib] message`: seconds since install,
//! level, and the record target with the `charuco_dataset_` prefix removed.
//! Records from other crates pass only at `warn` and above. With the
//! `tracing` feature, `init_tracing` installs a `tracing-subscriber`
//! formatter instead.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

const OWN_PREFIX: &str = "charuco_dataset";

struct PipelineLogger {
    level: LevelFilter,
    started: Instant,
}

fn is_own_target(target: &str) -> bool {
    target.starts_with(OWN_PREFIX)
}

/// `charuco_dataset_calib::solver` -> `calib::solver`, `charuco_dataset::x` -> `x`.
fn short_target(target: &str) -> &str {
    match target.strip_prefix(OWN_PREFIX) {
        Some(rest) => rest
            .strip_prefix('_')
            .or_else(|| rest.strip_prefix("::"))
            .filter(|r| !r.is_empty())
            .unwrap_or("main"),
        None => target,
    }
}

fn passes(level: LevelFilter, record_level: Level, target: &str) -> bool {
    let limit = if is_own_target(target) {
        level
    } else {
        level.min(LevelFilter::Warn)
    };
    record_level <= limit
}

fn format_line(elapsed_s: f64, level: Level, target: &str, message: &str) -> String {
    format!(
        "[{:7.3}s {:>5} {}] {}",
        elapsed_s,
        level,
        short_target(target),
        message
    )
}

impl Log for PipelineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        passes(self.level, metadata.level(), metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            record.target(),
            &record.args().to_string(),
        );
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<PipelineLogger> = OnceLock::new();

/// Install the stderr logger for this workspace's crates at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())`.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| PipelineLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Install a `tracing` subscriber honoring `RUST_LOG` (default `info`).
///
/// `json = true` emits one JSON object per event, with span-close timings.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_shortened() {
        assert_eq!(short_target("charuco_dataset_calib::solver"), "calib::solver");
        assert_eq!(short_target("charuco_dataset::pipeline"), "pipeline");
        assert_eq!(short_target("charuco_dataset"), "main");
        assert_eq!(short_target("image::codecs"), "image::codecs");
    }

    #[test]
    fn foreign_records_need_warn() {
        let debug = LevelFilter::Debug;
        assert!(passes(debug, Level::Debug, "charuco_dataset_charuco::detector"));
        assert!(!passes(debug, Level::Info, "rayon_core"));
        assert!(passes(debug, Level::Warn, "rayon_core"));
        assert!(!passes(LevelFilter::Error, Level::Warn, "rayon_core"));
        assert!(!passes(LevelFilter::Info, Level::Debug, "charuco_dataset"));
    }

    #[test]
    fn line_layout() {
        let line = format_line(1.5, Level::Info, "charuco_dataset_transforms::store", "wrote");
        assert_eq!(line, "[  1.500s  INFO transforms::store] wrote");
    }
}
