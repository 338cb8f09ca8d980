use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

// ── Platforms and identity ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Token-bearing platform (OAuth bearer token).
    Yahoo,
    /// Username-keyed platform (public API).
    Sleeper,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Yahoo => "yahoo",
            Source::Sleeper => "sleeper",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Source::Yahoo => "Yahoo Fantasy",
            Source::Sleeper => "Sleeper",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "yahoo" | "a" => Ok(Source::Yahoo),
            "sleeper" | "b" => Ok(Source::Sleeper),
            other => Err(format!("unknown source '{}': use 'yahoo' or 'sleeper'", other)),
        }
    }
}

/// Opaque caller identity handed over by the auth layer.
///
/// Yahoo expects a bearer token, Sleeper a username. Only the adapters read the
/// inner value; everything else passes it along untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    secret: String,
}

impl Identity {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self { secret: token.into() }
    }

    pub fn username(name: impl Into<String>) -> Self {
        Self { secret: name.into() }
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.trim()
    }

    pub fn is_empty(&self) -> bool {
        self.secret.trim().is_empty()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Identity(<redacted>)")
    }
}

// ── Normalized league data ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueRef {
    pub source: Source,
    pub external_id: String,
    pub display_name: String,
}

impl LeagueRef {
    pub fn new(source: Source, external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            source,
            external_id: external_id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSeason {
    pub team_id: String,
    pub owner_name: String,
    pub team_name: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub points_against: f64,
    pub final_rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matchup {
    pub week: u32,
    pub team_a_id: String,
    pub team_b_id: String,
    pub score_a: f64,
    pub score_b: f64,
    pub is_playoff: bool,
}

/// Whether a season's standings are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeasonStatus {
    #[default]
    Complete,
    /// Games have been played but the platform has not closed the season.
    InProgress,
    /// No game has been played yet.
    Unplayed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonRecord {
    pub year: i32,
    pub status: SeasonStatus,
    pub teams: Vec<TeamSeason>,
    pub matchups: Vec<Matchup>,
    /// Same teams as `teams`, ordered by rank 1..N.
    pub final_standings: Vec<TeamSeason>,
}

impl SeasonRecord {
    /// Only finished seasons award titles and placements.
    pub fn is_complete(&self) -> bool {
        self.status == SeasonStatus::Complete
    }
}

// ── Aggregated history ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OwnerRecord {
    pub owner: String,
    pub seasons: u32,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub points_against: f64,
    pub championships: u32,
    pub second_places: u32,
    pub third_places: u32,
    pub playoff_appearances: u32,
    pub playoff_wins: u32,
    pub playoff_losses: u32,
    pub playoff_ties: u32,
    pub longest_win_streak: u32,
}

impl OwnerRecord {
    pub fn games(&self) -> u32 {
        self.wins + self.losses + self.ties
    }

    pub fn podiums(&self) -> u32 {
        self.championships + self.second_places + self.third_places
    }

    pub fn playoff_games(&self) -> u32 {
        self.playoff_wins + self.playoff_losses + self.playoff_ties
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Champion {
    pub year: i32,
    pub owner: String,
}

/// Record between two owners; `owner_a` sorts before `owner_b`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeadToHead {
    pub owner_a: String,
    pub owner_b: String,
    pub a_wins: u32,
    pub b_wins: u32,
    pub ties: u32,
}

impl HeadToHead {
    pub fn games(&self) -> u32 {
        self.a_wins + self.b_wins + self.ties
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameScore {
    pub year: i32,
    pub week: u32,
    pub owner: String,
    pub opponent: String,
    pub score: f64,
    pub opponent_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameMargin {
    pub year: i32,
    pub week: u32,
    pub winner: String,
    pub loser: String,
    pub winner_score: f64,
    pub loser_score: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Streak {
    pub owner: String,
    pub length: u32,
    pub start: (i32, u32),
    pub end: (i32, u32),
}

/// A game measured against the median score of its week.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LuckGame {
    pub year: i32,
    pub week: u32,
    pub owner: String,
    pub opponent: String,
    pub score: f64,
    pub opponent_score: f64,
    pub week_median: f64,
}

/// Owner who gave up the most regular-season points in one year.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointsAgainstLeader {
    pub year: i32,
    pub owner: String,
    pub points_against: f64,
    pub per_game: f64,
    pub wins: u32,
    /// Leader's total minus the league's average total.
    pub above_average: f64,
}

/// Top-N lists, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Leaderboards {
    pub high_scores: Vec<GameScore>,
    pub low_scores: Vec<GameScore>,
    pub blowouts: Vec<GameMargin>,
    pub closest_games: Vec<GameMargin>,
    /// Each owner's longest run, longest first.
    pub win_streaks: Vec<Streak>,
    pub loss_streaks: Vec<Streak>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Records {
    pub highest_score: Option<GameScore>,
    pub lowest_score: Option<GameScore>,
    pub longest_win_streak: Option<Streak>,
    pub longest_loss_streak: Option<Streak>,
    pub biggest_blowout: Option<GameMargin>,
    pub closest_game: Option<GameMargin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingRow {
    pub rank: u32,
    pub owner: String,
    pub team_name: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
    pub points_for: f64,
    pub points_against: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub year: i32,
    pub status: SeasonStatus,
    pub champion: Option<String>,
    /// Top three finishers in rank order.
    pub podium: Vec<String>,
    pub standings: Vec<StandingRow>,
    pub games: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AllPlayRecord {
    pub owner: String,
    pub wins: u32,
    pub losses: u32,
    pub ties: u32,
}

impl AllPlayRecord {
    pub fn win_pct(&self) -> f64 {
        let total = self.wins + self.losses + self.ties;
        if total == 0 {
            return 0.0;
        }
        (self.wins as f64 + 0.5 * self.ties as f64) / total as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyRow {
    pub year: i32,
    pub owner: String,
    pub games: usize,
    pub mean: f64,
    /// Sample standard deviation; zero with fewer than two games.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryStats {
    pub years_covered: BTreeSet<i32>,
    pub owner_alltime: BTreeMap<String, OwnerRecord>,
    pub champions: Vec<Champion>,
    pub head_to_head: BTreeMap<(String, String), HeadToHead>,
    pub records: Records,
    pub leaderboards: Leaderboards,
    /// Losses while outscoring the week's median, highest score first.
    pub unlucky_losses: Vec<LuckGame>,
    /// Wins while scoring under the week's median, lowest score first.
    pub lucky_wins: Vec<LuckGame>,
    pub points_against_leaders: Vec<PointsAgainstLeader>,
    pub seasons: Vec<SeasonSummary>,
    pub all_play: BTreeMap<String, AllPlayRecord>,
    pub consistency: Vec<ConsistencyRow>,
}

// ── Jobs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `pending → running → {completed | failed}`; staying put is allowed for non-terminal states.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Pending) => true,
            (JobStatus::Pending, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (JobStatus::Running, JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedYear {
    pub year: i32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub source: Source,
    pub league_id: String,
    pub league_name: Option<String>,
    pub years_covered: Vec<i32>,
    pub skipped_years: Vec<SkippedYear>,
    /// All-time owner table, filled in once the report is built.
    pub alltime: Vec<OwnerRecord>,
    #[serde(skip_serializing)]
    pub result_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl Job {
    pub fn pending(id: String, request: &ReportRequest) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            message: "Waiting for a free worker...".to_string(),
            created_at: Utc::now(),
            source: request.source,
            league_id: request.league_id.trim().to_string(),
            league_name: None,
            years_covered: Vec::new(),
            skipped_years: Vec::new(),
            alltime: Vec::new(),
            result_path: None,
            error: None,
        }
    }
}

/// What the request layer asks the job manager to build.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub source: Source,
    pub league_id: String,
    pub identity: Identity,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
}

// API Response types
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Running.can_transition_to(Pending));
        for terminal in [Completed, Failed] {
            for next in [Pending, Running, Completed, Failed] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("Yahoo".parse::<Source>(), Ok(Source::Yahoo));
        assert_eq!(" sleeper ".parse::<Source>(), Ok(Source::Sleeper));
        assert!("espn".parse::<Source>().is_err());
    }

    #[test]
    fn test_identity_debug_is_redacted() {
        let identity = Identity::bearer("super-secret-token");
        assert!(!format!("{:?}", identity).contains("secret-token"));
        assert!(Identity::username("   ").is_empty());
    }
}
