use tracing::{Level, info};
use tracing_subscriber::{
    EnvFilter,
    fmt::Layer,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Filter directives for `log_level`: this crate at `log_level`, everything else at warn.
pub fn filter_directives(log_level: Level) -> String {
    format!("warn,netchange={log_level}")
}

/// Install the global tracing subscriber. Call once, before anything logs.
pub fn init_tracing(log_level: Level) {
    let mut fmt_layer = Layer::new().with_ansi(std::env::var("NO_COLOR").is_err());

    match log_level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directives(log_level)))
        .with(fmt_layer)
        .init();

    info!(
        event.name = "system.tracing_initialized",
        system.log_level = %log_level,
        "internal tracing and logging initialized"
    );
}
