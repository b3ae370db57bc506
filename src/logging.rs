//! Structured logging setup (spec §6): an append-only, line-delimited
//! format `[yyyy-MM-dd HH:mm:ss] [LEVEL] <message>` with levels `DEBUG,
//! INFO, WARN, ERROR, SUCCESS`, layered on top of `tracing`/
//! `tracing-subscriber` so ordinary `tracing::info!`/`warn!`/`error!`
//! call sites need no changes. `SUCCESS` is an application-level
//! convention, not a `tracing::Level`: call [`success`] (or log an event
//! carrying the `success` field) to get it.

use std::fmt;
use std::path::Path;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Emits an event that the custom formatter renders with the `SUCCESS`
/// level marker instead of `INFO`.
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!(success = true, $($arg)*)
    };
}

pub struct HermesFormatter;

impl<S, N> FormatEvent<S, N> for HermesFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");

        let mut visitor = SuccessVisitor::default();
        event.record(&mut visitor);

        let level = if visitor.success {
            "SUCCESS"
        } else {
            match *event.metadata().level() {
                Level::ERROR => "ERROR",
                Level::WARN => "WARN",
                Level::INFO => "INFO",
                Level::DEBUG => "DEBUG",
                Level::TRACE => "DEBUG",
            }
        };

        write!(writer, "[{now}] [{level}] ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[derive(Default)]
struct SuccessVisitor {
    success: bool,
}

impl Visit for SuccessVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "success" {
            self.success = value;
        }
    }

    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {}
}

/// Installs the global subscriber: env-filter console layer (teacher's
/// existing style) plus a durable file layer under `log_dir` (spec §6's
/// "Logs directory"), both sharing the same `[yyyy-MM-dd HH:mm:ss] [LEVEL]`
/// line format so a single call site produces console output and a
/// persisted, append-only transcript. Returns the file writer's
/// [`WorkerGuard`]; the caller must keep it alive for the process lifetime
/// (dropping it stops the background flush thread).
pub fn init(log_dir: &Path) -> WorkerGuard {
    use tracing_subscriber::prelude::*;

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .event_format(HermesFormatter)
        .with_ansi(false)
        .with_filter(env_filter());

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        eprintln!("hermes: could not create log directory {log_dir:?}: {e}");
    }
    let file_appender = tracing_appender::rolling::never(log_dir, crate::constants::LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .event_format(HermesFormatter)
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
