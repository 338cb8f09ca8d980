use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{Mutex, OnceCell};

use crate::config::PlatformSettings;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{Identity, LeagueRef, Matchup, SeasonRecord, Source, TeamSeason};
use crate::services::http::PlatformHttp;
use crate::services::platform::{
    assemble_season, settle_season, ChainStep, LeaguePlatform, SeasonChain, SeasonLink, SeasonMeta,
};

const DEFAULT_PLAYOFF_WEEK_START: u32 = 15;

// ── Sleeper API structures ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SleeperUser {
    pub user_id: String,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SleeperState {
    pub season: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleeperLeague {
    pub league_id: String,
    pub name: Option<String>,
    pub season: String,
    pub previous_league_id: Option<String>,
    /// `pre_draft`, `drafting`, `in_season` or `complete`.
    pub status: Option<String>,
    #[serde(default)]
    pub settings: SleeperLeagueSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SleeperLeagueSettings {
    pub playoff_week_start: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SleeperLeagueUser {
    pub user_id: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<SleeperUserMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct SleeperUserMetadata {
    pub team_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SleeperRoster {
    pub roster_id: u32,
    pub owner_id: Option<String>,
    #[serde(default)]
    pub settings: SleeperRosterSettings,
}

#[derive(Debug, Default, Deserialize)]
pub struct SleeperRosterSettings {
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub ties: u32,
    #[serde(default)]
    pub fpts: Option<f64>,
    #[serde(default)]
    pub fpts_decimal: Option<f64>,
    #[serde(default)]
    pub fpts_against: Option<f64>,
    #[serde(default)]
    pub fpts_against_decimal: Option<f64>,
}

impl SleeperRosterSettings {
    /// Sleeper splits points into an integer part and hundredths.
    pub fn points_for(&self) -> f64 {
        self.fpts.unwrap_or(0.0) + self.fpts_decimal.unwrap_or(0.0) / 100.0
    }

    pub fn points_against(&self) -> f64 {
        self.fpts_against.unwrap_or(0.0) + self.fpts_against_decimal.unwrap_or(0.0) / 100.0
    }
}

#[derive(Debug, Deserialize)]
pub struct SleeperMatchupEntry {
    pub roster_id: u32,
    pub matchup_id: Option<u32>,
    pub points: Option<f64>,
}

impl SleeperLeague {
    fn year(&self) -> HistoryResult<i32> {
        self.season
            .trim()
            .parse()
            .map_err(|_| HistoryError::Upstream(format!("league {} has season '{}'", self.league_id, self.season)))
    }

    /// Leagues without a status are historical and treated as finished.
    fn is_complete(&self) -> bool {
        self.status.as_deref().map_or(true, |s| s == "complete")
    }

    fn previous(&self) -> Option<String> {
        self.previous_league_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty() && *id != "0")
            .map(str::to_string)
    }
}

// ── Raw → domain mapping ─────────────────────────────────────────────────────

/// Join rosters with league users into `TeamSeason`s (ranks are assigned later).
pub fn map_rosters(rosters: &[SleeperRoster], users: &[SleeperLeagueUser]) -> Vec<TeamSeason> {
    let user_map: HashMap<&str, &SleeperLeagueUser> =
        users.iter().map(|u| (u.user_id.as_str(), u)).collect();

    rosters
        .iter()
        .map(|roster| {
            let user = roster.owner_id.as_deref().and_then(|id| user_map.get(id));
            let fallback = format!("Team {}", roster.roster_id);

            let owner_name = user
                .and_then(|u| u.display_name.clone())
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| fallback.clone());
            let team_name = user
                .and_then(|u| u.metadata.as_ref())
                .and_then(|m| m.team_name.clone())
                .filter(|n| !n.trim().is_empty())
                .unwrap_or(fallback);

            TeamSeason {
                team_id: roster.roster_id.to_string(),
                owner_name,
                team_name,
                wins: roster.settings.wins,
                losses: roster.settings.losses,
                ties: roster.settings.ties,
                points_for: roster.settings.points_for(),
                points_against: roster.settings.points_against(),
                final_rank: 0,
            }
        })
        .collect()
}

/// Pair weekly entries by `matchup_id`. Weeks where nobody has scored yet yield nothing.
pub fn map_week(week: u32, entries: &[SleeperMatchupEntry], playoff_week_start: u32) -> Vec<Matchup> {
    if entries.iter().all(|e| e.points.unwrap_or(0.0) == 0.0) {
        return Vec::new();
    }

    let mut groups: BTreeMap<u32, Vec<&SleeperMatchupEntry>> = BTreeMap::new();
    for entry in entries {
        if let Some(id) = entry.matchup_id {
            groups.entry(id).or_default().push(entry);
        }
    }

    groups
        .values()
        .filter(|teams| teams.len() >= 2)
        .map(|teams| Matchup {
            week,
            team_a_id: teams[0].roster_id.to_string(),
            team_b_id: teams[1].roster_id.to_string(),
            score_a: teams[0].points.unwrap_or(0.0),
            score_b: teams[1].points.unwrap_or(0.0),
            is_playoff: week >= playoff_week_start,
        })
        .collect()
}

// ── SleeperPlatform ──────────────────────────────────────────────────────────

pub struct SleeperPlatform {
    http: PlatformHttp,
    base_url: String,
    identity: Identity,
    max_weeks: u32,
    user_id: OnceCell<String>,
    chain: Mutex<SeasonChain>,
    leagues: Mutex<HashMap<String, SleeperLeague>>,
}

impl SleeperPlatform {
    pub fn new(settings: &PlatformSettings, identity: Identity) -> HistoryResult<Self> {
        Ok(Self {
            http: PlatformHttp::new("Sleeper", settings)?,
            base_url: settings.sleeper_base_url.trim_end_matches('/').to_string(),
            identity,
            max_weeks: settings.max_weeks,
            user_id: OnceCell::new(),
            chain: Mutex::new(SeasonChain::default()),
            leagues: Mutex::new(HashMap::new()),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> HistoryResult<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        self.http.get_json(&url, None, &[]).await
    }

    /// Username → user id. Sleeper answers unknown users with `null`.
    async fn lookup_user(&self, username: &str) -> HistoryResult<String> {
        let user: Option<SleeperUser> = match self.get(&format!("user/{}", username)).await {
            Err(HistoryError::NotFound(_)) => None,
            other => other?,
        };
        user.map(|u| u.user_id)
            .ok_or_else(|| HistoryError::Auth(format!("Sleeper user '{}' not found", username)))
    }

    async fn own_user_id(&self) -> HistoryResult<&String> {
        self.user_id
            .get_or_try_init(|| self.lookup_user(self.identity.expose()))
            .await
    }

    async fn get_league(&self, league_id: &str) -> HistoryResult<SleeperLeague> {
        if let Some(league) = self.leagues.lock().await.get(league_id) {
            return Ok(league.clone());
        }
        let league: Option<SleeperLeague> = self.get(&format!("league/{}", league_id)).await?;
        let league = league.ok_or_else(|| HistoryError::NotFound(format!("Sleeper league {} not found", league_id)))?;
        self.leagues.lock().await.insert(league_id.to_string(), league.clone());
        Ok(league)
    }

    fn link(league: &SleeperLeague) -> HistoryResult<SeasonLink> {
        Ok(SeasonLink {
            year: league.year()?,
            key: league.league_id.clone(),
            previous: league.previous(),
        })
    }

    /// Follow `previous_league_id` until `year` is reached.
    async fn league_for_year(&self, league: &LeagueRef, year: i32) -> HistoryResult<SleeperLeague> {
        let mut chain = self.chain.lock().await;
        if chain.is_empty() {
            let root = self.get_league(&league.external_id).await?;
            chain.insert(Self::link(&root)?);
        }

        loop {
            match chain.step(year) {
                ChainStep::Found(link) => return self.get_league(&link.key).await,
                ChainStep::Missing => {
                    return Err(HistoryError::NotFound(format!(
                        "league {} has no {} season",
                        league.external_id, year
                    )))
                }
                ChainStep::Fetch(previous_id) => match self.get_league(&previous_id).await {
                    Ok(previous) => chain.insert(Self::link(&previous)?),
                    Err(HistoryError::NotFound(_)) => chain.seal(),
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

#[async_trait]
impl LeaguePlatform for SleeperPlatform {
    fn source(&self) -> Source {
        Source::Sleeper
    }

    async fn list_leagues(&self, identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
        let user_id = if identity == &self.identity {
            self.own_user_id().await?.clone()
        } else {
            self.lookup_user(identity.expose()).await?
        };

        let state: SleeperState = self.get("state/nfl").await?;
        let current: i32 = state
            .season
            .trim()
            .parse()
            .map_err(|_| HistoryError::Upstream(format!("unexpected NFL season '{}'", state.season)))?;

        let mut found = Vec::new();
        for year in (current - 2..=current).rev() {
            let leagues: Option<Vec<SleeperLeague>> =
                match self.get(&format!("user/{}/leagues/nfl/{}", user_id, year)).await {
                    Ok(leagues) => leagues,
                    Err(e @ HistoryError::Auth(_)) => return Err(e),
                    Err(e) => {
                        tracing::warn!("Sleeper leagues for {} unavailable: {}", year, e);
                        continue;
                    }
                };
            for league in leagues.unwrap_or_default() {
                let name = league.name.clone().unwrap_or_else(|| "Unknown League".to_string());
                found.push(LeagueRef::new(Source::Sleeper, league.league_id, name));
            }
        }

        Ok(found)
    }

    async fn season_metadata(&self, league: &LeagueRef) -> HistoryResult<SeasonMeta> {
        let root = self.get_league(&league.external_id).await?;
        Ok(SeasonMeta {
            league_name: root.name.clone().unwrap_or_else(|| league.display_name.clone()),
            latest_year: root.year()?,
        })
    }

    async fn fetch_season(&self, league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord> {
        let season_league = self.league_for_year(league, year).await?;
        let league_id = season_league.league_id.as_str();
        let playoff_week_start = season_league
            .settings
            .playoff_week_start
            .filter(|w| *w > 0)
            .unwrap_or(DEFAULT_PLAYOFF_WEEK_START);

        let users: Vec<SleeperLeagueUser> = self.get(&format!("league/{}/users", league_id)).await?;
        let rosters: Vec<SleeperRoster> = self.get(&format!("league/{}/rosters", league_id)).await?;
        let teams = map_rosters(&rosters, &users);

        let mut matchups = Vec::new();
        for week in 1..=self.max_weeks {
            let entries: Option<Vec<SleeperMatchupEntry>> =
                match self.get(&format!("league/{}/matchups/{}", league_id, week)).await {
                    Err(HistoryError::NotFound(_)) => break,
                    other => other?,
                };
            let games = map_week(week, &entries.unwrap_or_default(), playoff_week_start);
            if games.is_empty() {
                break;
            }
            matchups.extend(games);
        }

        tracing::info!(
            "Sleeper {} season {}: {} teams, {} matchups",
            league_id, year, teams.len(), matchups.len()
        );
        settle_season(assemble_season(year, teams, matchups), season_league.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SeasonStatus;
    use crate::services::fixture_server::{FixtureServer, Fixtures};
    use serde_json::json;

    fn rosters_fixture() -> Vec<SleeperRoster> {
        serde_json::from_str(
            r#"[
                {"roster_id": 1, "owner_id": "u1", "settings": {"wins": 9, "losses": 4, "ties": 0,
                    "fpts": 1650, "fpts_decimal": 42, "fpts_against": 1500, "fpts_against_decimal": 8}},
                {"roster_id": 2, "owner_id": "u2", "settings": {"wins": 4, "losses": 9,
                    "fpts": 1400, "fpts_against": 1580}},
                {"roster_id": 3, "owner_id": null, "settings": {}}
            ]"#,
        )
        .unwrap()
    }

    fn users_fixture() -> Vec<SleeperLeagueUser> {
        serde_json::from_str(
            r#"[
                {"user_id": "u1", "display_name": "BigMike", "metadata": {"team_name": "Gridiron Gang"}},
                {"user_id": "u2", "display_name": "Sally", "metadata": {}}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_map_rosters_joins_users() {
        let teams = map_rosters(&rosters_fixture(), &users_fixture());
        assert_eq!(teams.len(), 3);

        assert_eq!(teams[0].owner_name, "BigMike");
        assert_eq!(teams[0].team_name, "Gridiron Gang");
        assert!((teams[0].points_for - 1650.42).abs() < 1e-9);
        assert!((teams[0].points_against - 1500.08).abs() < 1e-9);

        assert_eq!(teams[1].team_name, "Team 2");
        assert_eq!(teams[1].ties, 0);

        // Orphaned roster gets a stable placeholder owner.
        assert_eq!(teams[2].owner_name, "Team 3");
        assert_eq!(teams[2].wins, 0);
    }

    #[test]
    fn test_map_week_pairs_by_matchup_id() {
        let entries: Vec<SleeperMatchupEntry> = serde_json::from_str(
            r#"[
                {"roster_id": 1, "matchup_id": 2, "points": 101.5},
                {"roster_id": 2, "matchup_id": 1, "points": 88.0},
                {"roster_id": 3, "matchup_id": 1, "points": 92.25},
                {"roster_id": 4, "matchup_id": 2, "points": 120.0},
                {"roster_id": 5, "matchup_id": null, "points": 70.0}
            ]"#,
        )
        .unwrap();

        let games = map_week(3, &entries, 15);
        assert_eq!(games.len(), 2);
        assert_eq!((games[0].team_a_id.as_str(), games[0].team_b_id.as_str()), ("2", "3"));
        assert_eq!((games[1].score_a, games[1].score_b), (101.5, 120.0));
        assert!(games.iter().all(|g| g.week == 3 && !g.is_playoff));

        let playoffs = map_week(15, &entries, 15);
        assert!(playoffs.iter().all(|g| g.is_playoff));
    }

    #[test]
    fn test_unplayed_week_is_empty() {
        let entries: Vec<SleeperMatchupEntry> = serde_json::from_str(
            r#"[
                {"roster_id": 1, "matchup_id": 1, "points": 0},
                {"roster_id": 2, "matchup_id": 1, "points": null}
            ]"#,
        )
        .unwrap();
        assert!(map_week(16, &entries, 15).is_empty());
    }

    #[test]
    fn test_league_previous_id_filtering() {
        let league: SleeperLeague = serde_json::from_str(
            r#"{"league_id": "99", "name": "Dynasty", "season": "2023", "previous_league_id": "0"}"#,
        )
        .unwrap();
        assert_eq!(league.year().unwrap(), 2023);
        assert_eq!(league.previous(), None);
        assert_eq!(league.settings.playoff_week_start, None);
        assert!(league.is_complete());

        let live: SleeperLeague = serde_json::from_str(
            r#"{"league_id": "100", "season": "2024", "status": "in_season"}"#,
        )
        .unwrap();
        assert!(!live.is_complete());
    }

    /// One league season: Ann (roster 1) against Bob (roster 2) each week, then an empty week.
    fn season_fixtures(
        fixtures: Fixtures,
        league_id: &str,
        season: &str,
        previous: Option<&str>,
        status: &str,
        weeks: &[(f64, f64)],
    ) -> Fixtures {
        let ann_wins = weeks.iter().filter(|(a, b)| a > b).count();
        let bob_wins = weeks.iter().filter(|(a, b)| b > a).count();
        let mut fixtures = fixtures
            .json(
                &format!("/league/{}", league_id),
                json!({"league_id": league_id, "name": "Dynasty", "season": season,
                       "previous_league_id": previous, "status": status}),
            )
            .json(
                &format!("/league/{}/users", league_id),
                json!([{"user_id": "u1", "display_name": "Ann"}, {"user_id": "u2", "display_name": "Bob"}]),
            )
            .json(
                &format!("/league/{}/rosters", league_id),
                json!([
                    {"roster_id": 1, "owner_id": "u1", "settings": {"wins": ann_wins, "losses": bob_wins}},
                    {"roster_id": 2, "owner_id": "u2", "settings": {"wins": bob_wins, "losses": ann_wins}}
                ]),
            );
        for (i, (ann, bob)) in weeks.iter().enumerate() {
            fixtures = fixtures.json(
                &format!("/league/{}/matchups/{}", league_id, i + 1),
                json!([
                    {"roster_id": 1, "matchup_id": 1, "points": ann},
                    {"roster_id": 2, "matchup_id": 1, "points": bob}
                ]),
            );
        }
        fixtures.json(&format!("/league/{}/matchups/{}", league_id, weeks.len() + 1), json!([]))
    }

    async fn dynasty_server() -> FixtureServer {
        let fixtures = Fixtures::new().json("/user/mike", json!({"user_id": "u1", "username": "mike"}));
        let fixtures = season_fixtures(fixtures, "300", "2024", Some("200"), "complete", &[(110.0, 90.0)]);
        let fixtures = season_fixtures(fixtures, "200", "2023", Some("100"), "complete", &[(100.0, 120.0)]);
        let fixtures = season_fixtures(fixtures, "100", "2022", None, "complete", &[(95.0, 80.0), (70.0, 99.5)]);
        fixtures.serve().await
    }

    fn platform(server: &FixtureServer, username: &str) -> SleeperPlatform {
        SleeperPlatform::new(&server.settings(17), Identity::username(username)).unwrap()
    }

    fn dynasty() -> LeagueRef {
        LeagueRef::new(Source::Sleeper, "300", "Dynasty")
    }

    #[tokio::test]
    async fn test_fetch_season_follows_previous_league_ids() {
        let server = dynasty_server().await;
        let sleeper = platform(&server, "mike");

        let season = sleeper.fetch_season(&dynasty(), 2022).await.unwrap();
        assert_eq!(season.year, 2022);
        assert_eq!(season.status, SeasonStatus::Complete);
        assert_eq!(season.matchups.len(), 2);
        assert_eq!(season.matchups[1].score_b, 99.5);
        assert!(server.was_hit("/league/200"));
        assert!(server.was_hit("/league/100"));

        // The empty third week ends the walk.
        assert!(server.was_hit("/league/100/matchups/3"));
        assert!(!server.was_hit("/league/100/matchups/4"));

        // The chain ended at 2022, so 2021 is answered without another request.
        let before = server.hits().len();
        assert!(matches!(sleeper.fetch_season(&dynasty(), 2021).await, Err(HistoryError::NotFound(_))));
        assert_eq!(server.hits().len(), before);
    }

    #[tokio::test]
    async fn test_discover_year_range_over_http() {
        let server = dynasty_server().await;
        let sleeper = platform(&server, "mike");
        assert_eq!(sleeper.discover_year_range(&dynasty()).await.unwrap(), (2022, 2024));
    }

    #[tokio::test]
    async fn test_in_progress_and_unplayed_seasons() {
        let fixtures = season_fixtures(Fixtures::new(), "400", "2025", None, "in_season", &[(101.0, 99.0)]);
        let fixtures = season_fixtures(fixtures, "500", "2025", None, "pre_draft", &[]);
        let server = fixtures.serve().await;
        let sleeper = platform(&server, "mike");

        let live = sleeper
            .fetch_season(&LeagueRef::new(Source::Sleeper, "400", "Live"), 2025)
            .await
            .unwrap();
        assert_eq!(live.status, SeasonStatus::InProgress);
        assert_eq!(live.matchups.len(), 1);

        let sleeper = platform(&server, "mike");
        let unplayed = sleeper.fetch_season(&LeagueRef::new(Source::Sleeper, "500", "New"), 2025).await;
        assert!(matches!(unplayed, Err(HistoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_username_is_auth() {
        let server = Fixtures::new().json("/user/ghost", json!(null)).serve().await;

        for name in ["ghost", "nobody"] {
            let sleeper = platform(&server, name);
            let result = sleeper.list_leagues(&Identity::username(name)).await;
            assert!(matches!(result, Err(HistoryError::Auth(_))), "{}", name);
        }
        assert!(server.was_hit("/user/nobody"));
        assert!(!server.was_hit("/state/nfl"));
    }

    #[tokio::test]
    async fn test_list_leagues_spans_recent_seasons() {
        let server = Fixtures::new()
            .json("/user/mike", json!({"user_id": "u1"}))
            .json("/state/nfl", json!({"season": "2024", "week": 3}))
            .json("/user/u1/leagues/nfl/2024", json!([{"league_id": "300", "name": "Dynasty", "season": "2024"}]))
            .json("/user/u1/leagues/nfl/2023", json!([
                {"league_id": "200", "name": "Dynasty", "season": "2023"},
                {"league_id": "201", "season": "2023"}
            ]))
            .serve()
            .await;
        let sleeper = platform(&server, "mike");

        let leagues = sleeper.list_leagues(&Identity::username("mike")).await.unwrap();
        let ids: Vec<&str> = leagues.iter().map(|l| l.external_id.as_str()).collect();
        assert_eq!(ids, vec!["300", "200", "201"]);
        assert_eq!(leagues[2].display_name, "Unknown League");
        // 2022 answered 404 and was skipped.
        assert!(server.was_hit("/user/u1/leagues/nfl/2022"));
    }
}
