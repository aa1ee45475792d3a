use time::format_description::parse;
use tracing_subscriber::{filter::Directive, fmt::time::OffsetTime, EnvFilter};

use crate::cli::Commands;

/// Noisy third-party targets
const QUIET_DIRECTIVES: [&str; 2] = [
    "sqlx::postgres::notice=warn",
    "sea_orm_migration::migrator=warn",
];

pub fn default_level<'a>(command: Option<&Commands>, worker_log_level: &'a str) -> &'a str {
    match command {
        // One-shot commands keep their output clean
        Some(
            Commands::Enqueue { .. }
            | Commands::Stats { .. }
            | Commands::List { .. }
            | Commands::Show { .. }
            | Commands::Reap
            | Commands::Migrate { .. },
        ) => "warn",
        Some(Commands::Version) => "error",
        Some(Commands::Work) | None => worker_log_level,
    }
}

pub fn setup_tracing_for_command(command: Option<&Commands>, worker_log_level: &str) {
    let level = default_level(command, worker_log_level);

    // RUST_LOG overrides the default level (e.g. RUST_LOG=taskmill=debug)
    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    for directive in QUIET_DIRECTIVES {
        if let Ok(directive) = directive.parse::<Directive>() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_ansi(true)
        .compact();

    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    match parse("[hour]:[minute]:[second].[subsecond digits:2]") {
        Ok(format) => subscriber.with_timer(OffsetTime::new(offset, format)).init(),
        Err(_) => subscriber.init(),
    }
}
