use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::PlatformSettings;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{Identity, LeagueRef, Matchup, SeasonRecord, SeasonStatus, Source, TeamSeason};
use crate::services::{SleeperPlatform, YahooPlatform};

/// Year-range discovery never walks below this season.
pub const MIN_SEASON_YEAR: i32 = 2000;

/// Consecutive missing seasons that end year-range discovery.
pub const MAX_BOUNDARY_MISSES: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonMeta {
    pub league_name: String,
    pub latest_year: i32,
}

/// Capability set every league data source provides.
///
/// Implementations return data already mapped onto the common model, so nothing
/// downstream needs to know which platform it came from.
#[async_trait]
pub trait LeaguePlatform: Send + Sync {
    fn source(&self) -> Source;

    /// Every league visible to `identity`.
    async fn list_leagues(&self, identity: &Identity) -> HistoryResult<Vec<LeagueRef>>;

    /// League name and most recent known season.
    async fn season_metadata(&self, league: &LeagueRef) -> HistoryResult<SeasonMeta>;

    /// One season's teams, matchups and ranked standings.
    async fn fetch_season(&self, league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord>;

    async fn latest_season(&self, league: &LeagueRef) -> HistoryResult<i32> {
        Ok(self.season_metadata(league).await?.latest_year)
    }

    /// Walk down from the latest season until two consecutive seasons are missing.
    ///
    /// Throttling or transport failures while probing are treated as "season
    /// probably exists" so the job's own skip policy decides what to do with it.
    async fn discover_year_range(&self, league: &LeagueRef) -> HistoryResult<(i32, i32)> {
        let latest = self.latest_season(league).await?;
        let mut earliest = latest;
        let mut misses = 0u32;
        let mut year = latest - 1;

        while year >= MIN_SEASON_YEAR && misses < MAX_BOUNDARY_MISSES {
            match self.fetch_season(league, year).await {
                Ok(_) => {
                    earliest = year;
                    misses = 0;
                }
                Err(HistoryError::NotFound(_)) => misses += 1,
                Err(e @ (HistoryError::RateLimited(_) | HistoryError::Upstream(_))) => {
                    tracing::warn!("Discovery probe for {} failed ({}); keeping it in range", year, e);
                    earliest = year;
                    misses = 0;
                }
                Err(e) => return Err(e),
            }
            year -= 1;
        }

        tracing::info!(
            "Discovered seasons {}-{} for league {} ({})",
            earliest, latest, league.external_id, league.source
        );
        Ok((earliest, latest))
    }
}

// ── Standings ────────────────────────────────────────────────────────────────

/// wins desc, points-for desc, points-against asc, team id asc.
pub fn standings_order(a: &TeamSeason, b: &TeamSeason) -> Ordering {
    b.wins
        .cmp(&a.wins)
        .then_with(|| b.points_for.total_cmp(&a.points_for))
        .then_with(|| a.points_against.total_cmp(&b.points_against))
        .then_with(|| a.team_id.cmp(&b.team_id))
}

/// Recompute W/L/T and points from regular-season matchups.
pub fn standings_from_matchups(teams: &mut [TeamSeason], matchups: &[Matchup]) {
    let index: HashMap<String, usize> = teams
        .iter()
        .enumerate()
        .map(|(i, t)| (t.team_id.clone(), i))
        .collect();

    for team in teams.iter_mut() {
        team.wins = 0;
        team.losses = 0;
        team.ties = 0;
        team.points_for = 0.0;
        team.points_against = 0.0;
    }

    for m in matchups.iter().filter(|m| !m.is_playoff) {
        let sides = [
            (&m.team_a_id, m.score_a, m.score_b),
            (&m.team_b_id, m.score_b, m.score_a),
        ];
        for (team_id, scored, allowed) in sides {
            let Some(&i) = index.get(team_id) else { continue };
            let team = &mut teams[i];
            team.points_for += scored;
            team.points_against += allowed;
            match scored.total_cmp(&allowed) {
                Ordering::Greater => team.wins += 1,
                Ordering::Less => team.losses += 1,
                Ordering::Equal => team.ties += 1,
            }
        }
    }
}

/// Build a `SeasonRecord`, ranking teams 1..N by `standings_order`.
///
/// When the source reports no wins for anyone the records are rebuilt from the
/// matchups first. A season with neither games nor recorded results is
/// `Unplayed`; anything else starts out `Complete` until `settle_season` says
/// otherwise.
pub fn assemble_season(year: i32, mut teams: Vec<TeamSeason>, matchups: Vec<Matchup>) -> SeasonRecord {
    let has_results = teams.iter().any(|t| t.wins > 0 || t.ties > 0);
    let status = if matchups.is_empty() && teams.iter().all(|t| t.wins + t.losses + t.ties == 0) {
        SeasonStatus::Unplayed
    } else {
        SeasonStatus::Complete
    };
    if !has_results && !matchups.is_empty() {
        tracing::info!("No standings data for {}, calculating from matchups", year);
        standings_from_matchups(&mut teams, &matchups);
    }

    let mut order: Vec<usize> = (0..teams.len()).collect();
    order.sort_by(|&a, &b| standings_order(&teams[a], &teams[b]));
    for (rank, &i) in order.iter().enumerate() {
        teams[i].final_rank = rank as u32 + 1;
    }

    let final_standings = order.iter().map(|&i| teams[i].clone()).collect();

    SeasonRecord {
        year,
        status,
        teams,
        matchups,
        final_standings,
    }
}

/// Apply the platform's "season finished" flag.
///
/// Seasons without a single game come back as `NotFound` so the job skips
/// them and discovery treats them as a miss.
pub fn settle_season(mut season: SeasonRecord, finished: bool) -> HistoryResult<SeasonRecord> {
    match season.status {
        SeasonStatus::Unplayed => Err(HistoryError::NotFound(format!(
            "the {} season has not started",
            season.year
        ))),
        SeasonStatus::Complete if !finished => {
            tracing::info!("Season {} is still in progress", season.year);
            season.status = SeasonStatus::InProgress;
            Ok(season)
        }
        _ => Ok(season),
    }
}

// ── Season chains ────────────────────────────────────────────────────────────

/// One season in a platform's "previous league" chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonLink {
    pub year: i32,
    pub key: String,
    pub previous: Option<String>,
}

pub enum ChainStep {
    Found(SeasonLink),
    Fetch(String),
    Missing,
}

/// Lazily resolved `year → season key` map, filled by following previous-season links.
#[derive(Debug, Default)]
pub struct SeasonChain {
    links: BTreeMap<i32, SeasonLink>,
}

impl SeasonChain {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    fn oldest(&self) -> Option<&SeasonLink> {
        self.links.values().next()
    }

    /// Add a link; links that are not strictly older than the chain's tail end the chain.
    pub fn insert(&mut self, link: SeasonLink) {
        if let Some(oldest) = self.oldest() {
            if link.year >= oldest.year {
                tracing::warn!("Season chain loops back to {} at {}; stopping", link.year, link.key);
                self.seal();
                return;
            }
        }
        self.links.insert(link.year, link);
    }

    /// Mark the oldest known season as having no predecessor.
    pub fn seal(&mut self) {
        if let Some(oldest) = self.links.values_mut().next() {
            oldest.previous = None;
        }
    }

    pub fn step(&self, year: i32) -> ChainStep {
        if let Some(link) = self.links.get(&year) {
            return ChainStep::Found(link.clone());
        }
        match self.oldest() {
            Some(oldest) if year < oldest.year => match &oldest.previous {
                Some(previous) => ChainStep::Fetch(previous.clone()),
                None => ChainStep::Missing,
            },
            _ => ChainStep::Missing,
        }
    }
}

// ── Memoizing decorator ──────────────────────────────────────────────────────

/// Remembers fetched seasons so discovery probes are not fetched twice.
pub struct SeasonCache {
    inner: Arc<dyn LeaguePlatform>,
    seasons: Mutex<HashMap<(String, i32), SeasonRecord>>,
}

impl SeasonCache {
    pub fn new(inner: Arc<dyn LeaguePlatform>) -> Self {
        Self {
            inner,
            seasons: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl LeaguePlatform for SeasonCache {
    fn source(&self) -> Source {
        self.inner.source()
    }

    async fn list_leagues(&self, identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
        self.inner.list_leagues(identity).await
    }

    async fn season_metadata(&self, league: &LeagueRef) -> HistoryResult<SeasonMeta> {
        self.inner.season_metadata(league).await
    }

    async fn fetch_season(&self, league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord> {
        let key = (league.external_id.clone(), year);
        if let Some(season) = self.seasons.lock().await.get(&key) {
            return Ok(season.clone());
        }

        let season = self.inner.fetch_season(league, year).await?;
        self.seasons.lock().await.insert(key, season.clone());
        Ok(season)
    }
}

// ── Adapter selection ────────────────────────────────────────────────────────

/// Picks the adapter for a `Source` tag.
pub trait PlatformFactory: Send + Sync {
    fn connect(&self, source: Source, identity: &Identity) -> HistoryResult<Arc<dyn LeaguePlatform>>;
}

pub struct HttpPlatformFactory {
    settings: PlatformSettings,
}

impl HttpPlatformFactory {
    pub fn new(settings: PlatformSettings) -> Self {
        Self { settings }
    }
}

impl PlatformFactory for HttpPlatformFactory {
    fn connect(&self, source: Source, identity: &Identity) -> HistoryResult<Arc<dyn LeaguePlatform>> {
        if identity.is_empty() {
            return Err(HistoryError::Auth(format!("no {} credentials supplied", source.display_name())));
        }
        let platform: Arc<dyn LeaguePlatform> = match source {
            Source::Yahoo => Arc::new(YahooPlatform::new(&self.settings, identity.clone())?),
            Source::Sleeper => Arc::new(SleeperPlatform::new(&self.settings, identity.clone())?),
        };
        Ok(platform)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    pub fn team(id: &str, owner: &str, wins: u32, losses: u32, pf: f64, pa: f64) -> TeamSeason {
        TeamSeason {
            team_id: id.to_string(),
            owner_name: owner.to_string(),
            team_name: format!("{} FC", owner),
            wins,
            losses,
            ties: 0,
            points_for: pf,
            points_against: pa,
            final_rank: 0,
        }
    }

    pub fn game(week: u32, a: &str, b: &str, score_a: f64, score_b: f64) -> Matchup {
        Matchup {
            week,
            team_a_id: a.to_string(),
            team_b_id: b.to_string(),
            score_a,
            score_b,
            is_playoff: false,
        }
    }

    /// Platform with a fixed set of available seasons that counts fetches.
    struct YearsPlatform {
        years: BTreeSet<i32>,
        latest: i32,
        calls: AtomicUsize,
        probed: std::sync::Mutex<Vec<i32>>,
    }

    #[async_trait]
    impl LeaguePlatform for YearsPlatform {
        fn source(&self) -> Source {
            Source::Sleeper
        }

        async fn list_leagues(&self, _identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
            Ok(vec![])
        }

        async fn season_metadata(&self, _league: &LeagueRef) -> HistoryResult<SeasonMeta> {
            Ok(SeasonMeta { league_name: "Test".into(), latest_year: self.latest })
        }

        async fn fetch_season(&self, _league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.probed.lock().unwrap().push(year);
            if self.years.contains(&year) {
                Ok(assemble_season(year, vec![team("1", "Ann", 1, 0, 100.0, 90.0)], vec![]))
            } else {
                Err(HistoryError::NotFound(format!("no season {}", year)))
            }
        }
    }

    fn years_platform(years: &[i32], latest: i32) -> YearsPlatform {
        YearsPlatform {
            years: years.iter().copied().collect(),
            latest,
            calls: AtomicUsize::new(0),
            probed: std::sync::Mutex::new(vec![]),
        }
    }

    fn league() -> LeagueRef {
        LeagueRef::new(Source::Sleeper, "123", "Test")
    }

    #[test]
    fn test_standings_are_a_ranked_permutation() {
        let teams = vec![
            team("a", "Ann", 8, 5, 1500.0, 1400.0),
            team("b", "Bob", 10, 3, 1400.0, 1300.0),
            team("c", "Cat", 8, 5, 1500.0, 1350.0),
            team("d", "Dan", 8, 5, 1600.0, 1450.0),
            team("e", "Eve", 8, 5, 1500.0, 1350.0),
        ];
        let season = assemble_season(2022, teams, vec![]);

        let ids: Vec<&str> = season.final_standings.iter().map(|t| t.team_id.as_str()).collect();
        // Bob most wins; Dan most points among 8-5; Cat and Eve tie on everything but id.
        assert_eq!(ids, vec!["b", "d", "c", "e", "a"]);

        let ranks: Vec<u32> = season.final_standings.iter().map(|t| t.final_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

        let mut team_ids: Vec<&str> = season.teams.iter().map(|t| t.team_id.as_str()).collect();
        team_ids.sort();
        let mut standing_ids = ids.clone();
        standing_ids.sort();
        assert_eq!(team_ids, standing_ids);

        for t in &season.teams {
            let ranked = season.final_standings.iter().find(|s| s.team_id == t.team_id).unwrap();
            assert_eq!(t.final_rank, ranked.final_rank);
        }
    }

    #[test]
    fn test_standings_fallback_from_matchups() {
        let teams = vec![team("1", "Ann", 0, 0, 0.0, 0.0), team("2", "Bob", 0, 0, 0.0, 0.0)];
        let mut playoff = game(15, "1", "2", 80.0, 120.0);
        playoff.is_playoff = true;
        let matchups = vec![game(1, "1", "2", 110.0, 100.0), game(2, "2", "1", 95.5, 95.5), playoff];

        let season = assemble_season(2020, teams, matchups);
        let ann = &season.final_standings[0];
        assert_eq!(ann.owner_name, "Ann");
        assert_eq!((ann.wins, ann.losses, ann.ties), (1, 0, 1));
        assert_eq!(ann.points_for, 205.5);
        let bob = &season.final_standings[1];
        assert_eq!((bob.wins, bob.losses, bob.ties), (0, 1, 1));
    }

    #[test]
    fn test_season_status_follows_games_and_platform_flag() {
        let blank = vec![team("9", "Ann", 0, 0, 0.0, 0.0), team("3", "Bob", 0, 0, 0.0, 0.0)];
        let unplayed = assemble_season(2024, blank, vec![]);
        assert_eq!(unplayed.status, SeasonStatus::Unplayed);
        assert!(matches!(settle_season(unplayed, false), Err(HistoryError::NotFound(_))));

        let teams = vec![team("1", "Ann", 1, 0, 0.0, 0.0), team("2", "Bob", 0, 1, 0.0, 0.0)];
        let played = assemble_season(2024, teams, vec![game(1, "1", "2", 110.0, 90.0)]);
        assert_eq!(played.status, SeasonStatus::Complete);

        let running = settle_season(played.clone(), false).unwrap();
        assert_eq!(running.status, SeasonStatus::InProgress);
        assert!(!running.is_complete());
        assert!(settle_season(played, true).unwrap().is_complete());
    }

    #[test]
    fn test_season_chain_steps() {
        let mut chain = SeasonChain::default();
        chain.insert(SeasonLink { year: 2023, key: "c".into(), previous: Some("b".into()) });
        assert!(matches!(chain.step(2023), ChainStep::Found(_)));
        assert!(matches!(chain.step(2024), ChainStep::Missing));
        assert!(matches!(chain.step(2021), ChainStep::Fetch(ref k) if k == "b"));

        chain.insert(SeasonLink { year: 2022, key: "b".into(), previous: None });
        assert!(matches!(chain.step(2021), ChainStep::Missing));

        // A gap between two known seasons is simply missing.
        let mut gapped = SeasonChain::default();
        gapped.insert(SeasonLink { year: 2023, key: "c".into(), previous: Some("a".into()) });
        gapped.insert(SeasonLink { year: 2021, key: "a".into(), previous: None });
        assert!(matches!(gapped.step(2022), ChainStep::Missing));
    }

    #[test]
    fn test_season_chain_refuses_loops() {
        let mut chain = SeasonChain::default();
        chain.insert(SeasonLink { year: 2023, key: "c".into(), previous: Some("c".into()) });
        chain.insert(SeasonLink { year: 2023, key: "c".into(), previous: Some("c".into()) });
        assert!(matches!(chain.step(2022), ChainStep::Missing));
    }

    #[tokio::test]
    async fn test_discovery_stops_after_two_misses() {
        let platform = years_platform(&[2016, 2017, 2018, 2019, 2020, 2021, 2022, 2023], 2023);
        let range = platform.discover_year_range(&league()).await.unwrap();
        assert_eq!(range, (2016, 2023));

        // span of 7 probes below 2023 plus two boundary misses
        assert_eq!(platform.calls.load(AtomicOrdering::SeqCst), 9);
        let probed = platform.probed.lock().unwrap().clone();
        assert!(probed.iter().all(|y| *y >= 2016 - 2 && *y <= 2023));
        assert!(probed.windows(2).all(|w| w[0] > w[1]));
    }

    #[tokio::test]
    async fn test_discovery_bridges_single_gap() {
        let platform = years_platform(&[2018, 2020, 2021], 2021);
        let range = platform.discover_year_range(&league()).await.unwrap();
        assert_eq!(range, (2018, 2021));
    }

    #[tokio::test]
    async fn test_discovery_single_season() {
        let platform = years_platform(&[2024], 2024);
        let range = platform.discover_year_range(&league()).await.unwrap();
        assert_eq!(range, (2024, 2024));
        assert_eq!(platform.calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_season_cache_fetches_once() {
        let inner = Arc::new(years_platform(&[2022, 2023], 2023));
        let cache = SeasonCache::new(inner.clone());
        let league = league();

        cache.fetch_season(&league, 2022).await.unwrap();
        cache.fetch_season(&league, 2022).await.unwrap();
        assert!(cache.fetch_season(&league, 2019).await.is_err());
        assert!(cache.fetch_season(&league, 2019).await.is_err());

        // Hits are cached, misses are not.
        assert_eq!(inner.calls.load(AtomicOrdering::SeqCst), 3);
    }
}
