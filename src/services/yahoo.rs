use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::config::PlatformSettings;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{Identity, LeagueRef, Matchup, SeasonRecord, Source, TeamSeason};
use crate::services::http::PlatformHttp;
use crate::services::platform::{
    assemble_season, settle_season, ChainStep, LeaguePlatform, SeasonChain, SeasonLink, SeasonMeta,
};

/// Yahoo's per-season NFL game ids.
pub const NFL_GAME_IDS: &[(i32, u32)] = &[
    (2025, 461),
    (2024, 449),
    (2023, 423),
    (2022, 414),
    (2021, 406),
    (2020, 399),
    (2019, 390),
    (2018, 380),
    (2017, 371),
    (2016, 359),
    (2015, 348),
    (2014, 331),
    (2013, 314),
    (2012, 273),
    (2011, 257),
    (2010, 242),
    (2009, 222),
    (2008, 199),
    (2007, 175),
    (2006, 153),
];

const LEAGUE_LIST_SEASONS: usize = 3;

pub fn year_for_game_id(game_id: u32) -> Option<i32> {
    NFL_GAME_IDS.iter().find(|(_, id)| *id == game_id).map(|(y, _)| *y)
}

/// Accepts a full league key ("449.l.516875") or a bare league id, which is
/// assumed to belong to the newest known game.
pub fn normalize_league_key(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains(".l.") {
        raw.to_string()
    } else {
        format!("{}.l.{}", NFL_GAME_IDS[0].1, raw)
    }
}

/// `renew` values look like "449_516875".
pub fn renew_to_league_key(renew: &str) -> Option<String> {
    let (game, league) = renew.trim().split_once('_')?;
    if game.is_empty() || league.is_empty() || !game.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}.l.{}", game, league))
}

// ── JSON navigation ──────────────────────────────────────────────────────────
//
// Yahoo's JSON is an XML translation: collections are objects keyed "0".."n"
// plus "count", and records are arrays of single-key fragments.

/// Numeric-keyed children of a collection, in index order, each unwrapped by `item`.
fn indexed<'a>(collection: &'a Value, item: &str) -> Vec<&'a Value> {
    let Some(map) = collection.as_object() else {
        return match collection.as_array() {
            Some(list) => list.iter().filter_map(|v| v.get(item)).collect(),
            None => Vec::new(),
        };
    };

    let mut entries: Vec<(usize, &Value)> = map
        .iter()
        .filter_map(|(k, v)| Some((k.parse::<usize>().ok()?, v.get(item)?)))
        .collect();
    entries.sort_by_key(|(i, _)| *i);
    entries.into_iter().map(|(_, v)| v).collect()
}

/// Flatten a fragment list (possibly nested one level) into one object.
fn merge_fragments(value: &Value) -> Map<String, Value> {
    let mut merged = Map::new();
    match value {
        Value::Object(map) => merged.extend(map.clone()),
        Value::Array(items) => {
            for item in items {
                merged.extend(merge_fragments(item));
            }
        }
        _ => {}
    }
    merged
}

/// First element of a collection that may be an array or an object keyed "0".
fn first_entry(value: &Value) -> Option<&Value> {
    value.get(0).or_else(|| value.get("0"))
}

fn as_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn as_u32(value: Option<&Value>) -> u32 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn league_section(doc: &Value) -> HistoryResult<&Vec<Value>> {
    doc.pointer("/fantasy_content/league")
        .and_then(Value::as_array)
        .ok_or_else(|| HistoryError::Upstream("Yahoo response has no league section".to_string()))
}

// ── Parsed structures ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct YahooLeagueMeta {
    pub league_key: String,
    pub name: String,
    pub season: i32,
    pub renew: Option<String>,
    pub end_week: Option<u32>,
    /// `is_finished` flag; seasons that leave it out are taken as finished.
    pub finished: bool,
}

/// Team header fragments: key, name and the first manager's nickname.
struct TeamHeader {
    key: String,
    name: String,
    manager: String,
}

fn parse_team_header(fragments: &Value) -> Option<TeamHeader> {
    let info = merge_fragments(fragments);
    let key = as_string(info.get("team_key"))?;
    let name = as_string(info.get("name")).unwrap_or_else(|| key.clone());

    let nickname = info
        .get("managers")
        .and_then(first_entry)
        .and_then(|m| m.get("manager"))
        .and_then(|m| as_string(m.get("nickname")))
        .filter(|n| n != "--hidden--");

    Some(TeamHeader {
        key,
        manager: nickname.unwrap_or_else(|| name.clone()),
        name,
    })
}

pub fn parse_league_meta(doc: &Value) -> HistoryResult<YahooLeagueMeta> {
    let league = league_section(doc)?;
    let meta = league
        .first()
        .map(merge_fragments)
        .ok_or_else(|| HistoryError::Upstream("Yahoo league metadata is empty".to_string()))?;

    let league_key = as_string(meta.get("league_key"))
        .ok_or_else(|| HistoryError::Upstream("Yahoo league has no key".to_string()))?;

    let season = match as_string(meta.get("season")).and_then(|s| s.parse().ok()) {
        Some(season) => season,
        None => league_key
            .split('.')
            .next()
            .and_then(|g| g.parse().ok())
            .and_then(year_for_game_id)
            .ok_or_else(|| HistoryError::Upstream(format!("cannot tell the season of {}", league_key)))?,
    };

    Ok(YahooLeagueMeta {
        name: as_string(meta.get("name")).unwrap_or_else(|| "Unknown League".to_string()),
        season,
        renew: as_string(meta.get("renew")).and_then(|r| renew_to_league_key(&r)),
        end_week: Some(as_u32(meta.get("end_week"))).filter(|w| *w > 0),
        finished: meta.get("is_finished").map_or(true, |f| as_u32(Some(f)) == 1),
        league_key,
    })
}

pub fn parse_standings(doc: &Value) -> HistoryResult<Vec<TeamSeason>> {
    let league = league_section(doc)?;
    let Some(standings) = league.get(1).and_then(|l| l.get("standings")) else {
        return Ok(Vec::new());
    };
    let Some(teams) = first_entry(standings).and_then(|s| s.get("teams")).or_else(|| standings.get("teams")) else {
        return Ok(Vec::new());
    };

    let mut parsed = Vec::new();
    for team in indexed(teams, "team") {
        let Some(header) = team.get(0).and_then(parse_team_header) else {
            continue;
        };

        // Usually the second element, occasionally folded into the header fragments.
        let standing = team
            .get(1)
            .and_then(|t| t.get("team_standings"))
            .cloned()
            .or_else(|| merge_fragments(&team[0]).get("team_standings").cloned())
            .unwrap_or(Value::Null);

        let outcomes = standing.get("outcome_totals");
        parsed.push(TeamSeason {
            team_id: header.key,
            owner_name: header.manager,
            team_name: header.name,
            wins: as_u32(outcomes.and_then(|o| o.get("wins"))),
            losses: as_u32(outcomes.and_then(|o| o.get("losses"))),
            ties: as_u32(outcomes.and_then(|o| o.get("ties"))),
            points_for: as_f64(standing.get("points_for")),
            points_against: as_f64(standing.get("points_against")),
            final_rank: as_u32(standing.get("rank")),
        });
    }
    Ok(parsed)
}

/// Completed or in-progress matchups for one week; not-yet-played ones are dropped.
pub fn parse_scoreboard(doc: &Value, week: u32) -> HistoryResult<Vec<Matchup>> {
    let league = league_section(doc)?;
    let Some(matchups) = league
        .get(1)
        .and_then(|l| l.get("scoreboard"))
        .and_then(|s| s.get("0"))
        .and_then(|s| s.get("matchups"))
    else {
        return Ok(Vec::new());
    };

    let mut games = Vec::new();
    for matchup in indexed(matchups, "matchup") {
        if matchup.get("status").and_then(Value::as_str) == Some("preevent") {
            continue;
        }
        let Some(teams) = matchup.get("0").and_then(|m| m.get("teams")) else {
            continue;
        };
        let sides: Vec<(String, f64)> = indexed(teams, "team")
            .into_iter()
            .filter_map(|team| {
                let header = team.get(0).and_then(parse_team_header)?;
                let points = as_f64(team.get(1).and_then(|t| t.pointer("/team_points/total")));
                Some((header.key, points))
            })
            .collect();
        if sides.len() < 2 {
            continue;
        }

        games.push(Matchup {
            week,
            team_a_id: sides[0].0.clone(),
            team_b_id: sides[1].0.clone(),
            score_a: sides[0].1,
            score_b: sides[1].1,
            is_playoff: as_string(matchup.get("is_playoffs")).as_deref() == Some("1"),
        });
    }
    Ok(games)
}

pub fn parse_user_leagues(doc: &Value) -> Vec<LeagueRef> {
    let Some(user) = doc
        .pointer("/fantasy_content/users/0/user")
        .and_then(|u| u.get(1))
    else {
        return Vec::new();
    };
    let Some(leagues) = user
        .get("games")
        .and_then(|g| g.get("0"))
        .and_then(|g| g.get("game"))
        .and_then(|g| g.get(1))
        .and_then(|g| g.get("leagues"))
    else {
        return Vec::new();
    };

    indexed(leagues, "league")
        .into_iter()
        .filter_map(|league| {
            let info = league.get(0).map(merge_fragments)?;
            let key = as_string(info.get("league_key"))?;
            let name = as_string(info.get("name")).unwrap_or_else(|| "Unknown League".to_string());
            Some(LeagueRef::new(Source::Yahoo, key, name))
        })
        .collect()
}

// ── YahooPlatform ────────────────────────────────────────────────────────────

pub struct YahooPlatform {
    http: PlatformHttp,
    base_url: String,
    identity: Identity,
    max_weeks: u32,
    chain: Mutex<SeasonChain>,
    leagues: Mutex<HashMap<String, YahooLeagueMeta>>,
}

impl YahooPlatform {
    pub fn new(settings: &PlatformSettings, identity: Identity) -> HistoryResult<Self> {
        Ok(Self {
            http: PlatformHttp::new("Yahoo", settings)?,
            base_url: settings.yahoo_base_url.trim_end_matches('/').to_string(),
            identity,
            max_weeks: settings.max_weeks,
            chain: Mutex::new(SeasonChain::default()),
            leagues: Mutex::new(HashMap::new()),
        })
    }

    async fn get(&self, endpoint: &str, identity: &Identity) -> HistoryResult<Value> {
        let url = format!("{}/{}", self.base_url, endpoint);
        self.http
            .get_json(&url, Some(identity.expose()), &[("format", "json")])
            .await
    }

    async fn league_meta(&self, league_key: &str) -> HistoryResult<YahooLeagueMeta> {
        if let Some(meta) = self.leagues.lock().await.get(league_key) {
            return Ok(meta.clone());
        }
        let doc = self.get(&format!("league/{}/settings", league_key), &self.identity).await?;
        let meta = parse_league_meta(&doc)?;
        self.leagues.lock().await.insert(league_key.to_string(), meta.clone());
        Ok(meta)
    }

    fn link(meta: &YahooLeagueMeta) -> SeasonLink {
        SeasonLink {
            year: meta.season,
            key: meta.league_key.clone(),
            previous: meta.renew.clone(),
        }
    }

    /// Follow the `renew` chain back until `year` is reached.
    async fn league_for_year(&self, league: &LeagueRef, year: i32) -> HistoryResult<YahooLeagueMeta> {
        let mut chain = self.chain.lock().await;
        if chain.is_empty() {
            let root = self.league_meta(&normalize_league_key(&league.external_id)).await?;
            chain.insert(Self::link(&root));
        }

        loop {
            match chain.step(year) {
                ChainStep::Found(link) => return self.league_meta(&link.key).await,
                ChainStep::Missing => {
                    return Err(HistoryError::NotFound(format!(
                        "league {} has no {} season",
                        league.external_id, year
                    )))
                }
                ChainStep::Fetch(previous_key) => match self.league_meta(&previous_key).await {
                    Ok(previous) => chain.insert(Self::link(&previous)),
                    // Older seasons the caller never belonged to come back as 403.
                    Err(HistoryError::NotFound(_)) | Err(HistoryError::Auth(_)) => {
                        tracing::info!("Yahoo renew chain ends before {}", previous_key);
                        chain.seal();
                    }
                    Err(e) => return Err(e),
                },
            }
        }
    }
}

#[async_trait]
impl LeaguePlatform for YahooPlatform {
    fn source(&self) -> Source {
        Source::Yahoo
    }

    async fn list_leagues(&self, identity: &Identity) -> HistoryResult<Vec<LeagueRef>> {
        let mut found = Vec::new();
        for (year, game_id) in NFL_GAME_IDS.iter().take(LEAGUE_LIST_SEASONS) {
            let endpoint = format!("users;use_login=1/games;game_keys={}/leagues", game_id);
            match self.get(&endpoint, identity).await {
                Ok(doc) => found.extend(parse_user_leagues(&doc)),
                Err(e @ HistoryError::Auth(_)) => return Err(e),
                Err(e) => tracing::warn!("Yahoo leagues for {} unavailable: {}", year, e),
            }
        }
        Ok(found)
    }

    async fn season_metadata(&self, league: &LeagueRef) -> HistoryResult<SeasonMeta> {
        let root = self.league_meta(&normalize_league_key(&league.external_id)).await?;
        Ok(SeasonMeta {
            league_name: root.name,
            latest_year: root.season,
        })
    }

    async fn fetch_season(&self, league: &LeagueRef, year: i32) -> HistoryResult<SeasonRecord> {
        let meta = self.league_for_year(league, year).await?;
        let key = meta.league_key.as_str();

        let standings = self.get(&format!("league/{}/standings", key), &self.identity).await?;
        let teams = parse_standings(&standings)?;

        let last_week = meta.end_week.map_or(self.max_weeks, |w| w.min(self.max_weeks));
        let mut matchups = Vec::new();
        for week in 1..=last_week {
            let doc = match self.get(&format!("league/{}/scoreboard;week={}", key, week), &self.identity).await {
                Ok(doc) => doc,
                Err(HistoryError::NotFound(_)) => break,
                Err(e) => return Err(e),
            };
            let games = parse_scoreboard(&doc, week)?;
            if games.is_empty() {
                break;
            }
            matchups.extend(games);
        }

        tracing::info!(
            "Yahoo {} season {}: {} teams, {} matchups",
            key, year, teams.len(), matchups.len()
        );
        settle_season(assemble_season(year, teams, matchups), meta.finished)
    }
}
