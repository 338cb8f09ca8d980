use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::jobs::JobManager;
use crate::models::{Identity, JobStatus, OwnerRecord, ReportRequest, Source};
use crate::services::HttpPlatformFactory;
use crate::utils::{format_record, win_percentage};

pub struct GenerateOptions {
    pub source: Source,
    pub league_id: String,
    pub identity: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub out: Option<PathBuf>,
    pub csv: Option<PathBuf>,
}

fn identity_for(source: Source, raw: &str) -> Identity {
    match source {
        Source::Yahoo => Identity::bearer(raw),
        Source::Sleeper => Identity::username(raw),
    }
}

fn job_manager(config: &AppConfig) -> JobManager {
    let factory = Arc::new(HttpPlatformFactory::new(config.platform.clone()));
    JobManager::new(config.jobs.clone(), factory)
}

pub async fn list_leagues(config: &AppConfig, source: Source, identity: &str) -> Result<()> {
    let jobs = job_manager(config);

    println!("🔎 Looking up {} leagues...", source.display_name());
    let leagues = jobs.list_leagues(source, &identity_for(source, identity)).await?;

    if leagues.is_empty() {
        println!("📭 No leagues found for that account.");
        return Ok(());
    }

    for league in &leagues {
        println!("  {:<24} {}", league.external_id, league.display_name);
    }
    println!("✅ Found {} leagues", leagues.len());
    Ok(())
}

pub async fn generate_report(config: &AppConfig, options: GenerateOptions) -> Result<()> {
    let jobs = job_manager(config);

    let job_id = jobs
        .create(ReportRequest {
            source: options.source,
            league_id: options.league_id.clone(),
            identity: identity_for(options.source, &options.identity),
            start_year: options.start_year,
            end_year: options.end_year,
        })
        .await?;

    println!("📊 Building history for {} league {}...", options.source.display_name(), options.league_id);

    let mut last_message = String::new();
    let job = loop {
        let job = jobs.get_status(&job_id).await?;
        if job.message != last_message {
            println!("   [{:>3}%] {}", job.progress, job.message);
            last_message = job.message.clone();
        }
        if job.status.is_terminal() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    };

    if job.status == JobStatus::Failed {
        return Err(anyhow!(
            "report failed: {}",
            job.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }

    for skipped in &job.skipped_years {
        println!("⚠️  Skipped {}: {}", skipped.year, skipped.reason);
    }

    let artifact = jobs.artifact(&job_id).await?;
    let destination = match &options.out {
        Some(out) => {
            std::fs::copy(&artifact, out)
                .with_context(|| format!("copying report to {}", out.display()))?;
            out.clone()
        }
        None => artifact,
    };
    println!("✅ Report written to {}", destination.display());

    print_alltime(&job.alltime);

    if let Some(csv_path) = &options.csv {
        export_csv(csv_path, &job.alltime)?;
        println!("💾 All-time table exported to {}", csv_path.display());
    }

    Ok(())
}

fn print_alltime(owners: &[OwnerRecord]) {
    let mut owners: Vec<&OwnerRecord> = owners.iter().collect();
    owners.sort_by(|a, b| b.wins.cmp(&a.wins).then_with(|| a.owner.cmp(&b.owner)));

    println!("\n🏆 All-time standings:");
    for (i, owner) in owners.iter().enumerate() {
        println!(
            "{:>2}. {:<22} {:>9}  {:>5.1}%  {:>4} games  {} titles  {} podiums  playoffs {} ({})",
            i + 1,
            owner.owner,
            format_record(owner.wins, owner.losses, owner.ties),
            win_percentage(owner.wins, owner.losses, owner.ties),
            owner.games(),
            owner.championships,
            owner.podiums(),
            owner.playoff_appearances,
            format_record(owner.playoff_wins, owner.playoff_losses, owner.playoff_ties)
        );
    }
}

pub fn export_csv(path: &Path, owners: &[OwnerRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for owner in owners {
        writer.serialize(owner)?;
    }
    writer.flush()?;
    Ok(())
}
