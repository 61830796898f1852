use crate::config::LogSettings;
use simplelog::*;
use std::fs::{self, OpenOptions};
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// `$HOME/.local/share/midi-macro/logs/app.log`
pub fn default_log_path() -> Result<PathBuf, Error> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::new(ErrorKind::NotFound, "HOME environment variable not set"))?;

    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("midi-macro")
        .join("logs")
        .join("app.log"))
}

/// Logs to the file at `settings.level` and echoes warnings and errors to the terminal.
pub fn init_logger(settings: &LogSettings) -> Result<(), Error> {
    let path = match &settings.file {
        Some(path) => path.clone(),
        None => default_log_path()?,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let log_file = OpenOptions::new().create(true).append(true).open(&path)?;

    let level = LevelFilter::from_str(&settings.level).map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("unknown log level '{}'", settings.level),
        )
    })?;

    INIT.call_once(|| {
        let loggers: Vec<Box<dyn SharedLogger>> = vec![
            WriteLogger::new(level, Config::default(), log_file),
            TermLogger::new(
                LevelFilter::Warn,
                Config::default(),
                TerminalMode::Stderr,
                ColorChoice::Auto,
            ),
        ];
        if CombinedLogger::init(loggers).is_ok() {
            LOGGER_INITIALIZED.store(true, Ordering::SeqCst);
        }
    });

    if LOGGER_INITIALIZED.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Other, "Logger initialization failed"))
    }
}
