use statrs::statistics::{Data, Median, Statistics};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{HistoryError, HistoryResult};
use crate::models::{
    AllPlayRecord, Champion, ConsistencyRow, GameMargin, GameScore, HeadToHead, HistoryStats, Leaderboards,
    LuckGame, OwnerRecord, PointsAgainstLeader, Records, SeasonRecord, SeasonSummary, StandingRow, Streak,
};
use crate::utils::owner_key;

/// Entries kept in the score, margin and luck lists.
pub const LEADERBOARD_SIZE: usize = 15;
/// Entries kept in the streak lists.
pub const STREAK_BOARD_SIZE: usize = 10;
/// Final ranks that count as a playoff appearance.
pub const PLAYOFF_SPOTS: u32 = 6;

/// Running streak for one owner.
#[derive(Default)]
struct RunState {
    wins: u32,
    win_start: (i32, u32),
    losses: u32,
    loss_start: (i32, u32),
}

enum Outcome {
    Win,
    Loss,
    Tie,
}

fn outcome(score: f64, opponent_score: f64) -> Outcome {
    match score.total_cmp(&opponent_score) {
        Ordering::Greater => Outcome::Win,
        Ordering::Less => Outcome::Loss,
        Ordering::Equal => Outcome::Tie,
    }
}

/// Owner display names keyed by their join key; first spelling wins.
struct OwnerNames {
    names: HashMap<String, String>,
}

impl OwnerNames {
    fn collect(seasons: &[&SeasonRecord]) -> Self {
        let mut names = HashMap::new();
        for season in seasons {
            for team in &season.final_standings {
                names
                    .entry(owner_key(&team.owner_name))
                    .or_insert_with(|| team.owner_name.trim().to_string());
            }
        }
        Self { names }
    }

    fn display(&self, raw: &str) -> String {
        self.names
            .get(&owner_key(raw))
            .cloned()
            .unwrap_or_else(|| raw.trim().to_string())
    }
}

/// Walks every game in (year, week) order and accumulates game-level stats.
#[derive(Default)]
struct GameLedger {
    head_to_head: BTreeMap<(String, String), HeadToHead>,
    runs: HashMap<String, RunState>,
    best_wins: BTreeMap<String, Streak>,
    best_losses: BTreeMap<String, Streak>,
    /// One entry per side of every game, in play order.
    sides: Vec<GameScore>,
    margins: Vec<GameMargin>,
    all_play: BTreeMap<String, AllPlayRecord>,
    scores: BTreeMap<(i32, String), Vec<f64>>,
}

impl GameLedger {
    fn record_game(&mut self, year: i32, week: u32, (owner_a, score_a): (&str, f64), (owner_b, score_b): (&str, f64)) {
        let (first, second) = if owner_a <= owner_b {
            ((owner_a, score_a), (owner_b, score_b))
        } else {
            ((owner_b, score_b), (owner_a, score_a))
        };
        let h2h = self
            .head_to_head
            .entry((first.0.to_string(), second.0.to_string()))
            .or_insert_with(|| HeadToHead {
                owner_a: first.0.to_string(),
                owner_b: second.0.to_string(),
                ..Default::default()
            });
        match first.1.total_cmp(&second.1) {
            Ordering::Greater => h2h.a_wins += 1,
            Ordering::Less => h2h.b_wins += 1,
            Ordering::Equal => h2h.ties += 1,
        }

        for (owner, score, opponent, opponent_score) in
            [(owner_a, score_a, owner_b, score_b), (owner_b, score_b, owner_a, score_a)]
        {
            self.sides.push(GameScore {
                year,
                week,
                owner: owner.to_string(),
                opponent: opponent.to_string(),
                score,
                opponent_score,
            });
            self.advance_streak(owner, outcome(score, opponent_score), (year, week));
        }

        if score_a != score_b {
            let (winner, winner_score, loser, loser_score) = if score_a > score_b {
                (owner_a, score_a, owner_b, score_b)
            } else {
                (owner_b, score_b, owner_a, score_a)
            };
            self.margins.push(GameMargin {
                year,
                week,
                winner: winner.to_string(),
                loser: loser.to_string(),
                winner_score,
                loser_score,
                margin: winner_score - loser_score,
            });
        }
    }

    fn advance_streak(&mut self, owner: &str, outcome: Outcome, at: (i32, u32)) {
        let run = self.runs.entry(owner.to_string()).or_default();
        match outcome {
            Outcome::Win => {
                if run.wins == 0 {
                    run.win_start = at;
                }
                run.wins += 1;
                run.losses = 0;
            }
            Outcome::Loss => {
                if run.losses == 0 {
                    run.loss_start = at;
                }
                run.losses += 1;
                run.wins = 0;
            }
            Outcome::Tie => {
                run.wins = 0;
                run.losses = 0;
            }
        }

        let (wins, win_start, losses, loss_start) = (run.wins, run.win_start, run.losses, run.loss_start);
        for (best, length, start) in [
            (&mut self.best_wins, wins, win_start),
            (&mut self.best_losses, losses, loss_start),
        ] {
            if length > 0 && best.get(owner).map_or(true, |s| length > s.length) {
                best.insert(
                    owner.to_string(),
                    Streak {
                        owner: owner.to_string(),
                        length,
                        start,
                        end: at,
                    },
                );
            }
        }
    }

    /// Each owner's weekly score against every other score that week.
    fn record_all_play(&mut self, week_scores: &[(String, f64)]) {
        for (owner, score) in week_scores {
            let entry = self.all_play.entry(owner.clone()).or_insert_with(|| AllPlayRecord {
                owner: owner.clone(),
                ..Default::default()
            });
            for (other, other_score) in week_scores {
                if other == owner {
                    continue;
                }
                match score.total_cmp(other_score) {
                    Ordering::Greater => entry.wins += 1,
                    Ordering::Less => entry.losses += 1,
                    Ordering::Equal => entry.ties += 1,
                }
            }
        }
    }

    /// Sorted, truncated lists plus the single all-time records taken from their heads.
    fn leaderboards(&self) -> (Leaderboards, Records) {
        let chronological = |a: &GameScore, b: &GameScore| {
            (a.year, a.week, &a.owner).cmp(&(b.year, b.week, &b.owner))
        };
        let high_scores = top(self.sides.clone(), LEADERBOARD_SIZE, |a, b| {
            b.score.total_cmp(&a.score).then_with(|| chronological(a, b))
        });
        // Zero usually means an unfinished game rather than a real score.
        let low_scores = top(
            self.sides.iter().filter(|g| g.score > 0.0).cloned().collect(),
            LEADERBOARD_SIZE,
            |a, b| a.score.total_cmp(&b.score).then_with(|| chronological(a, b)),
        );

        let by_time = |a: &GameMargin, b: &GameMargin| {
            (a.year, a.week, &a.winner).cmp(&(b.year, b.week, &b.winner))
        };
        let blowouts = top(self.margins.clone(), LEADERBOARD_SIZE, |a, b| {
            b.margin.total_cmp(&a.margin).then_with(|| by_time(a, b))
        });
        let closest_games = top(self.margins.clone(), LEADERBOARD_SIZE, |a, b| {
            a.margin.total_cmp(&b.margin).then_with(|| by_time(a, b))
        });

        let longest = |a: &Streak, b: &Streak| {
            b.length
                .cmp(&a.length)
                .then_with(|| a.end.cmp(&b.end))
                .then_with(|| a.owner.cmp(&b.owner))
        };
        let win_streaks = top(self.best_wins.values().cloned().collect(), STREAK_BOARD_SIZE, longest);
        let loss_streaks = top(self.best_losses.values().cloned().collect(), STREAK_BOARD_SIZE, longest);

        let records = Records {
            highest_score: high_scores.first().cloned(),
            lowest_score: low_scores.first().cloned(),
            longest_win_streak: win_streaks.first().cloned(),
            longest_loss_streak: loss_streaks.first().cloned(),
            biggest_blowout: blowouts.first().cloned(),
            closest_game: closest_games.first().cloned(),
        };
        let boards = Leaderboards {
            high_scores,
            low_scores,
            blowouts,
            closest_games,
            win_streaks,
            loss_streaks,
        };
        (boards, records)
    }

    /// Games decided against the grain of the week's median score.
    fn luck(&self) -> (Vec<LuckGame>, Vec<LuckGame>) {
        let mut weeks: BTreeMap<(i32, u32), Vec<&GameScore>> = BTreeMap::new();
        for side in &self.sides {
            weeks.entry((side.year, side.week)).or_default().push(side);
        }

        let mut unlucky = Vec::new();
        let mut lucky = Vec::new();
        for sides in weeks.values() {
            let median = Data::new(sides.iter().map(|s| s.score).collect::<Vec<f64>>()).median();
            for side in sides {
                let game = LuckGame {
                    year: side.year,
                    week: side.week,
                    owner: side.owner.clone(),
                    opponent: side.opponent.clone(),
                    score: side.score,
                    opponent_score: side.opponent_score,
                    week_median: median,
                };
                if side.score < side.opponent_score && side.score > median {
                    unlucky.push(game);
                } else if side.score > side.opponent_score && side.score < median {
                    lucky.push(game);
                }
            }
        }

        let by_time = |a: &LuckGame, b: &LuckGame| (a.year, a.week, &a.owner).cmp(&(b.year, b.week, &b.owner));
        (
            top(unlucky, LEADERBOARD_SIZE, |a, b| b.score.total_cmp(&a.score).then_with(|| by_time(a, b))),
            top(lucky, LEADERBOARD_SIZE, |a, b| a.score.total_cmp(&b.score).then_with(|| by_time(a, b))),
        )
    }
}

fn top<T>(mut items: Vec<T>, n: usize, order: impl FnMut(&T, &T) -> Ordering) -> Vec<T> {
    items.sort_by(order);
    items.truncate(n);
    items
}

/// Regular-season points allowed by one owner in one year.
#[derive(Default)]
struct Allowed {
    points: f64,
    games: u32,
    wins: u32,
}

fn points_against_leader(year: i32, allowed: &BTreeMap<String, Allowed>) -> Option<PointsAgainstLeader> {
    let (owner, leader) = allowed
        .iter()
        .max_by(|a, b| a.1.points.total_cmp(&b.1.points).then_with(|| b.0.cmp(a.0)))?;
    let average = allowed.values().map(|a| a.points).mean();
    Some(PointsAgainstLeader {
        year,
        owner: owner.clone(),
        points_against: leader.points,
        per_game: leader.points / leader.games.max(1) as f64,
        wins: leader.wins,
        above_average: leader.points - average,
    })
}

/// Combine per-season records into league-wide history.
///
/// Seasons are processed in ascending year order regardless of input order, so
/// the same seasons always produce the same stats. Titles, podium places and
/// playoff appearances come only from seasons whose status is complete.
pub fn aggregate(seasons: &[SeasonRecord]) -> HistoryResult<HistoryStats> {
    if seasons.is_empty() {
        return Err(HistoryError::EmptyHistory);
    }

    let mut ordered: Vec<&SeasonRecord> = seasons.iter().collect();
    ordered.sort_by_key(|s| s.year);

    let names = OwnerNames::collect(&ordered);
    let mut stats = HistoryStats::default();
    let mut ledger = GameLedger::default();

    for season in &ordered {
        stats.years_covered.insert(season.year);
        let complete = season.is_complete();

        let mut counted: HashSet<String> = HashSet::new();
        let mut team_owner: HashMap<&str, String> = HashMap::new();
        let mut rows = Vec::with_capacity(season.final_standings.len());

        for team in &season.final_standings {
            let owner = names.display(&team.owner_name);
            team_owner.insert(team.team_id.as_str(), owner.clone());

            let record = stats.owner_alltime.entry(owner.clone()).or_insert_with(|| OwnerRecord {
                owner: owner.clone(),
                ..Default::default()
            });
            if counted.insert(owner.clone()) {
                record.seasons += 1;
            }
            record.wins += team.wins;
            record.losses += team.losses;
            record.ties += team.ties;
            record.points_for += team.points_for;
            record.points_against += team.points_against;

            if complete {
                match team.final_rank {
                    1 => {
                        record.championships += 1;
                        stats.champions.push(Champion {
                            year: season.year,
                            owner: owner.clone(),
                        });
                    }
                    2 => record.second_places += 1,
                    3 => record.third_places += 1,
                    _ => {}
                }
                if team.final_rank <= PLAYOFF_SPOTS {
                    record.playoff_appearances += 1;
                }
            }

            rows.push(StandingRow {
                rank: team.final_rank,
                owner,
                team_name: team.team_name.clone(),
                wins: team.wins,
                losses: team.losses,
                ties: team.ties,
                points_for: team.points_for,
                points_against: team.points_against,
            });
        }

        let mut matchups: Vec<_> = season.matchups.iter().collect();
        matchups.sort_by_key(|m| m.week);

        let mut games = 0usize;
        let mut weekly: BTreeMap<u32, Vec<(String, f64)>> = BTreeMap::new();
        let mut allowed: BTreeMap<String, Allowed> = BTreeMap::new();
        for m in matchups {
            let (Some(owner_a), Some(owner_b)) =
                (team_owner.get(m.team_a_id.as_str()), team_owner.get(m.team_b_id.as_str()))
            else {
                tracing::debug!("Skipping {} week {} matchup with unknown team", season.year, m.week);
                continue;
            };
            if owner_a == owner_b {
                continue;
            }
            games += 1;
            ledger.record_game(
                season.year,
                m.week,
                (owner_a.as_str(), m.score_a),
                (owner_b.as_str(), m.score_b),
            );

            for (owner, score, opponent_score) in [(owner_a, m.score_a, m.score_b), (owner_b, m.score_b, m.score_a)] {
                if m.is_playoff {
                    if let Some(record) = stats.owner_alltime.get_mut(owner) {
                        match outcome(score, opponent_score) {
                            Outcome::Win => record.playoff_wins += 1,
                            Outcome::Loss => record.playoff_losses += 1,
                            Outcome::Tie => record.playoff_ties += 1,
                        }
                    }
                    continue;
                }

                weekly.entry(m.week).or_default().push((owner.clone(), score));
                ledger
                    .scores
                    .entry((season.year, owner.clone()))
                    .or_default()
                    .push(score);
                let against = allowed.entry(owner.clone()).or_default();
                against.points += opponent_score;
                against.games += 1;
                if score > opponent_score {
                    against.wins += 1;
                }
            }
        }
        for week_scores in weekly.values() {
            ledger.record_all_play(week_scores);
        }
        if let Some(leader) = points_against_leader(season.year, &allowed) {
            stats.points_against_leaders.push(leader);
        }

        let (champion, podium) = if complete {
            (
                rows.iter().find(|r| r.rank == 1).map(|r| r.owner.clone()),
                rows.iter().take(3).map(|r| r.owner.clone()).collect(),
            )
        } else {
            (None, Vec::new())
        };
        stats.seasons.push(SeasonSummary {
            year: season.year,
            status: season.status,
            champion,
            podium,
            standings: rows,
            games,
        });
    }

    for (owner, best) in &ledger.best_wins {
        if let Some(record) = stats.owner_alltime.get_mut(owner) {
            record.longest_win_streak = best.length;
        }
    }

    stats.consistency = ledger
        .scores
        .iter()
        .map(|((year, owner), scores)| consistency_row(*year, owner, scores))
        .collect();
    let (leaderboards, records) = ledger.leaderboards();
    let (unlucky, lucky) = ledger.luck();
    stats.leaderboards = leaderboards;
    stats.records = records;
    stats.unlucky_losses = unlucky;
    stats.lucky_wins = lucky;
    stats.head_to_head = ledger.head_to_head;
    stats.all_play = ledger.all_play;

    tracing::info!(
        "Aggregated {} seasons, {} owners, {} head-to-head pairs",
        stats.years_covered.len(),
        stats.owner_alltime.len(),
        stats.head_to_head.len()
    );
    Ok(stats)
}

fn consistency_row(year: i32, owner: &str, scores: &[f64]) -> ConsistencyRow {
    let std_dev = if scores.len() < 2 { 0.0 } else { scores.iter().std_dev() };
    ConsistencyRow {
        year,
        owner: owner.to_string(),
        games: scores.len(),
        mean: scores.iter().mean(),
        std_dev,
        min: Statistics::min(scores.iter()),
        max: Statistics::max(scores.iter()),
    }
}
