use miette::{IntoDiagnostic, Result, WrapErr};
use owo_colors::{OwoColorize, Style};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
    FmtSubscriber,
};

use crate::cli::LogLevel;

const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");

/// Dependencies only log at warn and above when `RUST_LOG` is unset
const QUIET_DEPENDENCIES: [&str; 3] = ["hyper=warn", "tower_http=warn", "axum=warn"];

/// Initialize the logging system.
///
/// `RUST_LOG` directives, when set, replace the configured level.
/// Must be called before the async runtime spawns its threads:
/// the local offset cannot be read soundly once the process is multi-threaded.
pub fn init_logging(level: LogLevel) -> Result<()> {
    let local_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let filter = build_filter(level, std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref())?;

    let subscriber = FmtSubscriber::builder()
        .event_format(RequestLogger::new(local_offset))
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .into_diagnostic()
        .wrap_err("Setting default subscriber failed")
}

/// The configured level, or the `RUST_LOG` directives when they are set
fn build_filter(level: LogLevel, env: Option<&str>) -> Result<EnvFilter> {
    let builder =
        EnvFilter::builder().with_default_directive(LevelFilter::from_level(level.into()).into());

    let Some(env) = env else {
        let mut filter = builder.parse_lossy("");
        for directive in QUIET_DEPENDENCIES {
            filter = filter.add_directive(directive.parse().into_diagnostic()?);
        }
        return Ok(filter);
    };
    Ok(builder.parse_lossy(env))
}

/// One line per event: local time, level, emitting module and fields.
///
/// Tokio workers all share the same thread name,
/// the module tells more about where a line comes from.
struct RequestLogger {
    offset: UtcOffset,
}

impl RequestLogger {
    fn new(offset: UtcOffset) -> Self {
        Self { offset }
    }
}

fn level_style(level: &Level) -> Style {
    match *level {
        Level::ERROR => Style::new().red().bold(),
        Level::WARN => Style::new().yellow(),
        Level::DEBUG => Style::new().blue(),
        Level::TRACE => Style::new().purple(),
        _ => Style::new().green(),
    }
}

/// `tubepipe::server::handlers` becomes `server::handlers`
fn short_target(target: &str) -> &str {
    target
        .strip_prefix(concat!(env!("CARGO_CRATE_NAME"), "::"))
        .unwrap_or(target)
}

impl<S, N> FormatEvent<S, N> for RequestLogger
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let now = OffsetDateTime::now_utc()
            .to_offset(self.offset)
            .time()
            .format(TIME_FORMAT)
            .map_err(|_| std::fmt::Error)?;
        let target = short_target(metadata.target());

        if writer.has_ansi_escapes() {
            let level = metadata.level();
            let padded = format!("{level:>5}");
            write!(
                writer,
                "{} {} {} ",
                now.dimmed(),
                padded.style(level_style(level)),
                target.cyan()
            )?;
        } else {
            write!(writer, "{now} {:>5} {target} ", metadata.level())?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
