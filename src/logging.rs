//! File logging for the binaries and the append-only cost log.

use chrono::Local;
use simplelog::{ConfigBuilder, LevelFilter, WriteLogger};
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use time::macros::format_description;

use crate::cost::CostManager;
use crate::error::{CrasError, Result};

/// Route the `log` facade to `<log_dir>/<stem>_<timestamp>.log`. Returns the path.
pub fn init_file_logger(log_dir: &Path, stem: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).map_err(|e| CrasError::io(log_dir, e))?;

    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_path = log_dir.join(format!("{stem}_{timestamp}.log"));
    let log_file = fs::File::create(&log_path).map_err(|e| CrasError::io(&log_path, e))?;

    WriteLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new()
            .set_time_format_custom(format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second]"
            ))
            .build(),
        log_file,
    )
    .map_err(|e| CrasError::Config(format!("failed to initialise file logger: {e}")))?;

    Ok(log_path)
}

/// Append-only text log; every scoring run adds its cost report here.
pub struct CostLog {
    writer: BufWriter<fs::File>,
}

impl CostLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CrasError::io(parent, e))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CrasError::io(path, e))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, msg: &str) -> io::Result<()> {
        let ts = Local::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.writer, "[{ts}] {msg}")?;
        self.writer.flush()
    }
}

/// Prints the cost summary and appends it to the cost log when dropped, so
/// the report is written on success, on a budget halt and on error returns.
pub struct FinalReport {
    cost: Arc<CostManager>,
    log: Option<CostLog>,
}

impl FinalReport {
    pub fn new(cost: Arc<CostManager>, log: Option<CostLog>) -> Self {
        Self { cost, log }
    }
}

impl Drop for FinalReport {
    fn drop(&mut self) {
        let summary = self.cost.summary();
        println!("{summary}");
        log::info!("{}", summary.trim());
        if let Some(l) = self.log.as_mut() {
            if let Err(e) = l.log(&summary) {
                log::warn!("could not write final summary to cost log: {e}");
                eprintln!("[Warning] Could not write final summary to log file: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::Rate;

    #[test]
    fn cost_log_appends_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scoring_run.log");

        CostLog::open(&path).unwrap().log("first run").unwrap();
        CostLog::open(&path).unwrap().log("second run").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] first run"));
        assert!(lines[1].ends_with("] second run"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn write_failure_is_reported() {
        let mut log = CostLog::open(Path::new("/dev/full")).unwrap();
        assert!(log.log("final summary").is_err());

        // the guard reports the failure instead of panicking
        let cost = Arc::new(CostManager::new(1.0));
        drop(FinalReport::new(cost, Some(CostLog::open(Path::new("/dev/full")).unwrap())));
    }

    #[test]
    fn final_report_is_written_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cost.log");
        let cost = Arc::new(CostManager::new(5.0).with_rate("m", Rate::new(1.0, 1.0)));
        cost.update(1000, 1000, "m");

        {
            let _report = FinalReport::new(cost.clone(), Some(CostLog::open(&path).unwrap()));
        }

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("Final Cost Report"));
        assert!(text.contains("Total Prompt Tokens:     1000"));
        assert!(text.contains("$2.000000"));
    }
}
