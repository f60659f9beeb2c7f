//! Walks `<input_root>/<dataset>/<model>/<run>/*.json`, works out what is still
//! unscored and feeds it to the [`Scorer`], persisting after every result.

use indicatif::{ProgressBar, ProgressStyle};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::error::{CrasError, Result};
use crate::scorer::{ScoreResult, Scored, Scorer};
use crate::store::{self, RoleScores, ScoreSender, ScoreUpdate, ScoreWriter, SCORES_FILE};
use crate::transcript::{Transcript, TurnRecord};

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub concurrency: usize,
}

/// Counters for one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub run_dirs: usize,
    pub transcripts: usize,
    pub fully_scored: usize,
    pub unreadable: usize,
    pub scored: usize,
    pub raw_text: usize,
    pub api_errors: usize,
}

impl RunSummary {
    fn record(&mut self, result: &ScoreResult) {
        self.scored += 1;
        match result {
            ScoreResult::RawText(_) => self.raw_text += 1,
            ScoreResult::Error(_) => self.api_errors += 1,
            ScoreResult::Structured(_) => {}
        }
    }
}

/// Records of `transcript` that still need a score, in history order.
///
/// Stored results are matched to records per role: with `k` results stored
/// for a role, its first `k` scorable records count as done.
pub fn pending_records<'a>(transcript: &'a Transcript, stored: Option<&RoleScores>) -> Vec<&'a TurnRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    transcript
        .scorable_records()
        .into_iter()
        .filter_map(|(rec, turn)| {
            let done = stored.and_then(|s| s.get(&turn.role)).map_or(0, Vec::len);
            let n = seen.entry(turn.role).or_insert(0);
            *n += 1;
            (*n > done).then_some(rec)
        })
        .collect()
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| CrasError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    out.sort();
    Ok(out)
}

fn sorted_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| CrasError::io(dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
        .collect();
    out.sort();
    Ok(out)
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct Driver {
    scorer: Arc<Scorer>,
    cfg: DriverConfig,
}

impl Driver {
    pub fn new(scorer: Arc<Scorer>, cfg: DriverConfig) -> Self {
        Self { scorer, cfg }
    }

    /// Score everything under the input root. Stops at the first
    /// [`CrasError::BudgetExceeded`] after flushing results already produced.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        for dataset in sorted_subdirs(&self.cfg.input_root)? {
            for model in sorted_subdirs(&dataset)? {
                for run in sorted_subdirs(&model)? {
                    let files = sorted_json_files(&run)?;
                    if files.is_empty() {
                        continue;
                    }
                    let rel: PathBuf = [file_name(&dataset), file_name(&model), file_name(&run)]
                        .iter()
                        .collect();
                    let out_dir = self.cfg.output_root.join(&rel);
                    fs::create_dir_all(&out_dir).map_err(|e| CrasError::io(&out_dir, e))?;

                    summary.run_dirs += 1;
                    self.process_run(&rel, &files, &out_dir.join(SCORES_FILE), &mut summary)
                        .await?;
                }
                println!(
                    "[✓] Scoring complete for {}/{}",
                    file_name(&dataset),
                    file_name(&model)
                );
            }
        }
        log::info!("driver finished: {summary:?}");
        Ok(summary)
    }

    async fn process_run(
        &self,
        rel: &Path,
        files: &[PathBuf],
        scores_path: &Path,
        summary: &mut RunSummary,
    ) -> Result<()> {
        println!("\nProcessing {} -> {}", rel.display(), scores_path.display());
        println!("  - Found {} JSON files to process", files.len());
        log::info!("run {} ({} transcripts)", rel.display(), files.len());

        let bar = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            bar.set_style(style);
        }

        for path in files {
            summary.transcripts += 1;
            let res = self.process_transcript(path, scores_path, &bar, summary).await;
            bar.inc(1);
            if let Err(e) = res {
                bar.abandon();
                return Err(e);
            }
        }
        bar.finish_and_clear();
        Ok(())
    }

    async fn process_transcript(
        &self,
        path: &Path,
        scores_path: &Path,
        bar: &ProgressBar,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let query_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let transcript = match Transcript::load(path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("skipping unreadable transcript {}: {e}", path.display());
                bar.println(format!("  ! Skipping unreadable transcript {query_id}: {e}"));
                summary.unreadable += 1;
                return Ok(());
            }
        };

        let (on_disk, backup) = store::load_or_recover(scores_path)?;
        if let Some(b) = backup {
            bar.println(format!(
                "  ! Corrupt score store {} moved to {}",
                scores_path.display(),
                b.display()
            ));
        }
        let done = store::scored_count(&on_disk, &query_id);
        let total = transcript.scorable_records().len();

        if done > 0 && done >= total {
            bar.println(format!("  - Skipping fully scored query: {query_id}"));
            summary.fully_scored += 1;
            return Ok(());
        }
        if done == 0 && total == 0 {
            bar.println(format!("  - Nothing to score in query: {query_id}"));
            return Ok(());
        }
        if done > 0 {
            bar.println(format!(
                "  + Resuming/Scoring query: {query_id} ({done}/{total} roles scored)"
            ));
        } else {
            bar.println(format!("  + Scoring new query: {query_id}"));
        }

        let pending: Vec<TurnRecord> = pending_records(&transcript, on_disk.get(&query_id))
            .into_iter()
            .cloned()
            .collect();
        bar.println(format!(
            "    - Processing {} valid records for query '{query_id}'",
            pending.len()
        ));
        log::info!(
            "query {query_id} ({}): {done}/{total} scored, {} pending",
            transcript.method.as_str(),
            pending.len()
        );

        if self.cfg.concurrency <= 1 {
            self.score_sequential(&query_id, &transcript.query, pending, scores_path, bar, summary)
                .await
        } else {
            self.score_pooled(&query_id, &transcript.query, pending, scores_path, bar, summary)
                .await
        }
    }

    async fn score_sequential(
        &self,
        query_id: &str,
        query: &str,
        pending: Vec<TurnRecord>,
        scores_path: &Path,
        bar: &ProgressBar,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let n = pending.len();
        for (i, rec) in pending.iter().enumerate() {
            let Some(Scored { role, result }) = self.scorer.score(rec, query).await? else {
                continue;
            };
            bar.println(format!(
                "      - Scoring role: '{role}' for query '{query_id}' ({}/{n})",
                i + 1
            ));
            report_result(bar, &role, &result);
            summary.record(&result);
            store::append_score(scores_path, query_id, &role, result)?;
        }
        Ok(())
    }

    async fn score_pooled(
        &self,
        query_id: &str,
        query: &str,
        pending: Vec<TurnRecord>,
        scores_path: &Path,
        bar: &ProgressBar,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let sem = Arc::new(Semaphore::new(self.cfg.concurrency));
        let (tx, writer) = ScoreWriter::spawn(scores_path);
        let mut join_set = JoinSet::new();

        for rec in pending {
            let sem = sem.clone();
            let scorer = self.scorer.clone();
            let tx = tx.clone();
            let query = query.to_string();
            let query_id = query_id.to_string();
            join_set.spawn(async move {
                // closed once a worker hits a fatal error: nothing new starts
                let Ok(_permit) = sem.acquire_owned().await else {
                    return Ok(None);
                };
                score_and_send(&scorer, &rec, &query, query_id, &tx).await
            });
        }
        drop(tx);

        let mut fatal: Option<CrasError> = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(Some(Scored { role, result }))) => {
                    bar.println(format!("      ✓ Scored role: '{role}' for query '{query_id}'"));
                    report_result(bar, &role, &result);
                    summary.record(&result);
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    if fatal.is_none() {
                        // calls already running finish so their usage is counted
                        log::error!("stopping worker pool for query {query_id}: {e}");
                        sem.close();
                        fatal = Some(e);
                    }
                }
                Err(e) => bar.println(format!("      ! Error processing record: {e}")),
            }
        }

        // every sender is gone once the pool is drained, so this flushes and returns
        let written = pool_outcome(fatal, writer.finish().await)?;
        log::info!("query {query_id}: {written} results written to {}", scores_path.display());
        Ok(())
    }
}

/// First fatal worker error wins, except that a worker which only saw the
/// writer go away defers to the writer's own error.
fn pool_outcome(fatal: Option<CrasError>, written: Result<usize>) -> Result<usize> {
    match (fatal, written) {
        (Some(CrasError::WriterStopped), Err(e)) => Err(e),
        (Some(e), _) => Err(e),
        (None, written) => written,
    }
}

async fn score_and_send(
    scorer: &Scorer,
    rec: &TurnRecord,
    query: &str,
    query_id: String,
    tx: &ScoreSender,
) -> Result<Option<Scored>> {
    let Some(scored) = scorer.score(rec, query).await? else {
        return Ok(None);
    };
    tx.send(ScoreUpdate {
        query_id,
        role: scored.role.clone(),
        result: scored.result.clone(),
    })?;
    Ok(Some(scored))
}

fn report_result(bar: &ProgressBar, role: &str, result: &ScoreResult) {
    match result {
        ScoreResult::RawText(_) => {
            bar.println(format!("      ! Failed to parse JSON for role '{role}'. Storing raw response."))
        }
        ScoreResult::Error(e) => bar.println(format!("      ! API Error for role '{role}': {}", e.error)),
        ScoreResult::Structured(_) => {}
    }
}
