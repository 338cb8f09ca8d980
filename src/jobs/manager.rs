use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::JobSettings;
use crate::error::{HistoryError, HistoryResult};
use crate::jobs::store::JobStore;
use crate::models::{Identity, Job, JobStatus, LeagueRef, ReportRequest, SeasonRecord, SkippedYear, Source};
use crate::services::{aggregate, render, LeaguePlatform, PlatformFactory, SeasonCache, MIN_SEASON_YEAR};

pub const MAX_SEASON_YEAR: i32 = 2100;

const PROGRESS_STARTED: u8 = 5;
const PROGRESS_RANGE_KNOWN: u8 = 10;
const PROGRESS_SEASONS_DONE: u8 = 85;
const PROGRESS_AGGREGATED: u8 = 90;
const PROGRESS_RENDERED: u8 = 95;

/// Runs report jobs in the background on a bounded pool and tracks their state.
#[derive(Clone)]
pub struct JobManager {
    store: Arc<JobStore>,
    factory: Arc<dyn PlatformFactory>,
    settings: Arc<JobSettings>,
    permits: Arc<Semaphore>,
}

impl JobManager {
    pub fn new(settings: JobSettings, factory: Arc<dyn PlatformFactory>) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs.max(1)));
        Self {
            store: Arc::new(JobStore::new()),
            factory,
            settings: Arc::new(settings),
            permits,
        }
    }

    /// Validate the request, record it as pending and start it in the background.
    pub async fn create(&self, request: ReportRequest) -> HistoryResult<String> {
        validate(&request)?;

        let id = Uuid::new_v4().to_string();
        self.store.insert(Job::pending(id.clone(), &request)).await;
        tracing::info!(
            "Queued job {} for {} league {} ({} jobs tracked)",
            id,
            request.source,
            request.league_id.trim(),
            self.store.len().await
        );

        let worker = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let _permit = match worker.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    worker.fail(&job_id, HistoryError::Upstream(format!("worker pool closed: {}", e))).await;
                    return;
                }
            };
            // Panics inside the pipeline surface here as a JoinError.
            let runner = worker.clone();
            let run_id = job_id.clone();
            match tokio::spawn(async move { runner.run(&run_id, request).await }).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => worker.fail(&job_id, e).await,
                Err(e) => {
                    worker
                        .fail(&job_id, HistoryError::Internal(format!("report worker panicked: {}", e)))
                        .await
                }
            }
        });

        Ok(id)
    }

    pub async fn get_status(&self, job_id: &str) -> HistoryResult<Job> {
        self.store.snapshot(job_id).await
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self, job_id: &str) -> HistoryResult<Job> {
        let mut rx = self.store.subscribe(job_id).await?;
        let job = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map_err(|_| HistoryError::NotFound(format!("job {}", job_id)))?;
        Ok(job.clone())
    }

    /// Path of a finished report.
    pub async fn artifact(&self, job_id: &str) -> HistoryResult<PathBuf> {
        let job = self.store.snapshot(job_id).await?;
        match (job.status, job.result_path) {
            (JobStatus::Completed, Some(path)) => Ok(path),
            _ => Err(HistoryError::Validation("report not ready".to_string())),
        }
    }

    /// Leagues visible to `identity` on `source`.
    pub async fn list_leagues(&self, source: Source, identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
        let platform = self.factory.connect(source, identity)?;
        platform.list_leagues(identity).await
    }

    async fn progress(&self, job_id: &str, progress: u8, message: impl Into<String>) -> HistoryResult<()> {
        let message = message.into();
        self.store
            .update(job_id, |job| {
                job.progress = progress;
                job.message = message;
            })
            .await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, err: HistoryError) {
        tracing::error!("Job {} failed: {}", job_id, err);
        // A job that never got a worker still passes through running.
        if let Ok(job) = self.store.snapshot(job_id).await {
            if job.status == JobStatus::Pending {
                if let Err(e) = self.store.update(job_id, |job| job.status = JobStatus::Running).await {
                    tracing::warn!("Job {}: could not move to running before failing: {}", job_id, e);
                }
            }
        }
        let result = self
            .store
            .update(job_id, |job| {
                job.status = JobStatus::Failed;
                job.message = "Report generation failed".to_string();
                job.error = Some(err.to_string());
            })
            .await;
        if let Err(e) = result {
            tracing::error!("Could not record failure of job {}: {}", job_id, e);
        }
    }

    async fn run(&self, job_id: &str, request: ReportRequest) -> HistoryResult<()> {
        self.store
            .update(job_id, |job| {
                job.status = JobStatus::Running;
                job.progress = PROGRESS_STARTED;
                job.message = format!("Connecting to {}...", request.source.display_name());
            })
            .await?;

        let platform: Arc<dyn LeaguePlatform> =
            Arc::new(SeasonCache::new(self.factory.connect(request.source, &request.identity)?));
        let league_id = request.league_id.trim();

        let meta = platform
            .season_metadata(&LeagueRef::new(request.source, league_id, league_id))
            .await?;
        let league = LeagueRef::new(request.source, league_id, meta.league_name.clone());
        self.store
            .update(job_id, |job| job.league_name = Some(meta.league_name.clone()))
            .await?;

        let (start, end) = match (request.start_year, request.end_year) {
            (Some(start), Some(end)) => (start, end),
            (start, end) => {
                self.progress(job_id, PROGRESS_STARTED, "Discovering league seasons...").await?;
                let (earliest, latest) = platform.discover_year_range(&league).await?;
                (
                    start.map_or(earliest, |s| s.max(earliest)),
                    end.map_or(latest, |e| e.min(latest)),
                )
            }
        };
        if start > end {
            return Err(HistoryError::Validation(format!(
                "no seasons of league {} fall within the requested years",
                league_id
            )));
        }
        self.progress(job_id, PROGRESS_RANGE_KNOWN, format!("Fetching seasons {}-{}...", start, end))
            .await?;

        let seasons = self.fetch_seasons(job_id, platform.as_ref(), &league, start, end).await?;

        let stats = aggregate(&seasons)?;
        self.progress(job_id, PROGRESS_AGGREGATED, "Rendering report...").await?;

        let document = render(&stats, &league)?;
        self.progress(job_id, PROGRESS_RENDERED, "Saving report...").await?;

        tokio::fs::create_dir_all(&self.settings.reports_dir).await?;
        let path = self.settings.reports_dir.join(format!("{}.pdf", job_id));
        tokio::fs::write(&path, &document).await?;

        let years: Vec<i32> = stats.years_covered.iter().copied().collect();
        let alltime = stats.owner_alltime.values().cloned().collect();
        self.store
            .update(job_id, |job| {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.message = format!("Report ready: {} seasons", years.len());
                job.years_covered = years;
                job.alltime = alltime;
                job.result_path = Some(path);
            })
            .await?;
        tracing::info!("Job {} completed ({} bytes)", job_id, document.len());
        Ok(())
    }

    /// Fetch every year in `start..=end`, skipping the ones that cannot be fetched.
    async fn fetch_seasons(
        &self,
        job_id: &str,
        platform: &dyn LeaguePlatform,
        league: &LeagueRef,
        start: i32,
        end: i32,
    ) -> HistoryResult<Vec<SeasonRecord>> {
        let total = (end - start + 1) as usize;
        let span = (PROGRESS_SEASONS_DONE - PROGRESS_RANGE_KNOWN) as usize;

        let mut seasons = Vec::new();
        let mut throttled_in_a_row = 0u32;
        let mut last_upstream: Option<HistoryError> = None;

        for (i, year) in (start..=end).enumerate() {
            let skipped = match self.fetch_with_backoff(platform, league, year).await {
                Ok(season) => {
                    throttled_in_a_row = 0;
                    seasons.push(season);
                    None
                }
                Err(e @ HistoryError::NotFound(_)) => {
                    throttled_in_a_row = 0;
                    Some(e.to_string())
                }
                Err(e @ HistoryError::RateLimited(_)) => {
                    throttled_in_a_row += 1;
                    if throttled_in_a_row >= self.settings.rate_limit_abort_after {
                        return Err(HistoryError::RateLimited(format!(
                            "{} consecutive seasons throttled; giving up at {}",
                            throttled_in_a_row, year
                        )));
                    }
                    Some(e.to_string())
                }
                Err(e @ HistoryError::Upstream(_)) => {
                    throttled_in_a_row = 0;
                    let reason = e.to_string();
                    last_upstream = Some(e);
                    Some(reason)
                }
                Err(e) => return Err(e),
            };

            if let Some(reason) = &skipped {
                tracing::warn!("Job {}: skipping {} ({})", job_id, year, reason);
            }
            let progress = PROGRESS_RANGE_KNOWN as usize + span * (i + 1) / total;
            let message = format!("Fetched season {} ({} of {})", year, i + 1, total);
            self.store
                .update(job_id, |job| {
                    job.progress = progress as u8;
                    job.message = message;
                    if let Some(reason) = skipped {
                        job.skipped_years.push(SkippedYear { year, reason });
                    }
                })
                .await?;
        }

        if seasons.is_empty() {
            return Err(last_upstream.unwrap_or(HistoryError::EmptyHistory));
        }
        Ok(seasons)
    }

    async fn fetch_with_backoff(
        &self,
        platform: &dyn LeaguePlatform,
        league: &LeagueRef,
        year: i32,
    ) -> HistoryResult<SeasonRecord> {
        let mut attempt = 0u32;
        loop {
            match platform.fetch_season(league, year).await {
                Err(HistoryError::RateLimited(msg)) if attempt < self.settings.rate_limit_retries => {
                    attempt += 1;
                    let delay = self.settings.rate_limit_backoff * attempt;
                    tracing::warn!("{} throttled ({}); retrying in {:?}", year, msg, delay);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

fn validate(request: &ReportRequest) -> HistoryResult<()> {
    if request.league_id.trim().is_empty() {
        return Err(HistoryError::Validation("league id is required".to_string()));
    }
    for year in [request.start_year, request.end_year].into_iter().flatten() {
        if !(MIN_SEASON_YEAR..=MAX_SEASON_YEAR).contains(&year) {
            return Err(HistoryError::Validation(format!(
                "year {} is outside {}-{}",
                year, MIN_SEASON_YEAR, MAX_SEASON_YEAR
            )));
        }
    }
    if let (Some(start), Some(end)) = (request.start_year, request.end_year) {
        if start > end {
            return Err(HistoryError::Validation(format!(
                "start year {} is after end year {}",
                start, end
            )));
        }
    }
    Ok(())
}
