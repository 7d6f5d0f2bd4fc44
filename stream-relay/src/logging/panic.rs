use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::PanicHookInfo;
use std::path::{Path, PathBuf};

use chrono::Local;

use super::LOG_FILE_PREFIX;

/// Route panics through `tracing` before the previous hook runs.
///
/// With `panic = "abort"` the non-blocking file writer may never flush, so
/// the record is also appended straight to today's log file when a log
/// directory is configured.
pub fn install_panic_hook(log_dir: Option<PathBuf>) {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let record = panic_record(info);
            tracing::error!(target: "stream_relay::panic", "{record}");

            if cfg!(panic = "abort")
                && let Some(dir) = log_dir.as_deref()
            {
                let _ = append_to_log(dir, &record);
            }
        }));

        previous(info);
    }));
}

fn append_to_log(dir: &Path, record: &str) -> std::io::Result<()> {
    let path = dir.join(format!(
        "{}.{}",
        LOG_FILE_PREFIX,
        Local::now().format("%Y-%m-%d")
    ));
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}

fn panic_record(info: &PanicHookInfo<'_>) -> String {
    let payload = info
        .payload()
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| info.payload().downcast_ref::<String>().cloned())
        .unwrap_or_else(|| info.to_string());
    let location = info
        .location()
        .map_or_else(|| "<unknown>".to_string(), |l| format!("{}:{}", l.file(), l.line()));
    let thread = std::thread::current();
    let thread = thread.name().unwrap_or("<unnamed>");

    format!(
        "{} PANIC thread={thread} location={location} payload={payload}\n{}",
        Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
        Backtrace::force_capture()
    )
}
