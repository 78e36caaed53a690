use std::env;
use std::str::FromStr;
use crate::error::AppRunError;
use crate::shell::{run_shell, ShellOptions};

pub mod config;
pub mod device;
pub mod error;
pub mod shell;

fn log_level() -> log::LevelFilter {
    env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| log::LevelFilter::from_str(&level).ok())
        .unwrap_or(log::LevelFilter::Info)
}

pub fn init_logging() -> Result<(), AppRunError> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level())
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        let file = fern::log_file(log_file).map_err(|source| AppRunError::LogFile { source })?;
        dispatch = dispatch.chain(file);
    }

    dispatch.apply()?;
    Ok(())
}

pub async fn run(options: ShellOptions) -> Result<(), AppRunError> {
    run_shell(options).await
}
