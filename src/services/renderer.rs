use pdf_writer::{Content, Name, Pdf, Rect, Ref, Str};

use crate::error::{HistoryError, HistoryResult};
use crate::models::{GameMargin, GameScore, HistoryStats, LeagueRef, LuckGame, OwnerRecord, SeasonStatus, Streak};
use crate::utils::{clean_text, describe_years, fit, fit_right, format_record, win_percentage};

/// Page-oriented text layout primitives the report is written against.
pub trait LayoutBackend {
    fn begin_page(&mut self) -> HistoryResult<()>;
    fn heading(&mut self, text: &str) -> HistoryResult<()>;
    fn line(&mut self, text: &str) -> HistoryResult<()>;
    fn finish(&mut self) -> HistoryResult<Vec<u8>>;
}

// ── PDF backend ──────────────────────────────────────────────────────────────

const HEADING_FONT: Name<'static> = Name(b"F1");
const BODY_FONT: Name<'static> = Name(b"F2");
const HEADING_SIZE: f32 = 14.0;
const HEADING_LEADING: f32 = 22.0;
const BODY_SIZE: f32 = 9.0;
const BODY_LEADING: f32 = 11.0;
/// Courier glyphs are 600/1000 em wide.
const COURIER_ADVANCE: f32 = 0.6;

/// PDF backend on `pdf-writer`: one text stream per page, two base-14 fonts.
pub struct PdfLayout {
    width: f32,
    height: f32,
    margin: f32,
    pages: Vec<Content>,
    cursor: f32,
}

impl PdfLayout {
    pub fn new(width: f32, height: f32, margin: f32) -> HistoryResult<Self> {
        let usable = height - 2.0 * margin;
        if width - 2.0 * margin < BODY_SIZE || usable < HEADING_LEADING + BODY_LEADING {
            return Err(HistoryError::Render(format!(
                "page {}x{} with margin {} cannot hold a line of text",
                width, height, margin
            )));
        }
        Ok(Self {
            width,
            height,
            margin,
            pages: Vec::new(),
            cursor: 0.0,
        })
    }

    /// US Letter, landscape.
    pub fn letter_landscape() -> HistoryResult<Self> {
        Self::new(792.0, 612.0, 40.0)
    }

    /// Body characters that fit between the margins.
    pub fn columns(&self) -> usize {
        ((self.width - 2.0 * self.margin) / (BODY_SIZE * COURIER_ADVANCE)) as usize
    }

    fn ensure_room(&mut self, leading: f32) -> HistoryResult<()> {
        if self.pages.is_empty() || self.cursor - leading < self.margin {
            self.begin_page()?;
        }
        Ok(())
    }

    fn place(&mut self, font: Name<'static>, size: f32, leading: f32, text: &str) -> HistoryResult<()> {
        self.ensure_room(leading)?;
        self.cursor -= leading;
        let text = printable(fit(text, self.columns()).trim_end());
        let (x, y) = (self.margin, self.cursor);
        let page = self
            .pages
            .last_mut()
            .ok_or_else(|| HistoryError::Render("no page to draw on".to_string()))?;
        page.begin_text();
        page.set_font(font, size);
        page.next_line(x, y);
        page.show(Str(text.as_bytes()));
        page.end_text();
        Ok(())
    }
}

impl LayoutBackend for PdfLayout {
    fn begin_page(&mut self) -> HistoryResult<()> {
        self.pages.push(Content::new());
        self.cursor = self.height - self.margin;
        Ok(())
    }

    fn heading(&mut self, text: &str) -> HistoryResult<()> {
        self.place(HEADING_FONT, HEADING_SIZE, HEADING_LEADING, text)
    }

    fn line(&mut self, text: &str) -> HistoryResult<()> {
        self.place(BODY_FONT, BODY_SIZE, BODY_LEADING, text)
    }

    fn finish(&mut self) -> HistoryResult<Vec<u8>> {
        if self.pages.is_empty() {
            return Err(HistoryError::Render("report has no pages".to_string()));
        }

        // 1 catalog, 2 page tree, 3-4 fonts, then (page, contents) pairs.
        let catalog_id = Ref::new(1);
        let tree_id = Ref::new(2);
        let heading_font_id = Ref::new(3);
        let body_font_id = Ref::new(4);
        let pages = std::mem::take(&mut self.pages);
        let page_ids: Vec<(Ref, Ref)> = (0..pages.len() as i32)
            .map(|i| (Ref::new(5 + 2 * i), Ref::new(6 + 2 * i)))
            .collect();

        let mut pdf = Pdf::new();
        pdf.catalog(catalog_id).pages(tree_id);
        pdf.pages(tree_id)
            .kids(page_ids.iter().map(|(page, _)| *page))
            .count(page_ids.len() as i32);
        pdf.type1_font(heading_font_id).base_font(Name(b"Helvetica-Bold"));
        pdf.type1_font(body_font_id).base_font(Name(b"Courier"));

        for (content, (page_id, content_id)) in pages.into_iter().zip(page_ids) {
            let mut page = pdf.page(page_id);
            page.media_box(Rect::new(0.0, 0.0, self.width, self.height));
            page.parent(tree_id);
            page.contents(content_id);
            page.resources()
                .fonts()
                .pair(HEADING_FONT, heading_font_id)
                .pair(BODY_FONT, body_font_id);
            drop(page);
            pdf.stream(content_id, &content.finish());
        }

        Ok(pdf.finish())
    }
}

/// Printable ASCII only; the string writer escapes delimiters.
fn printable(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

// ── Report layout ────────────────────────────────────────────────────────────

/// Render the league history as a PDF document.
pub fn render(stats: &HistoryStats, league: &LeagueRef) -> HistoryResult<Vec<u8>> {
    let mut layout = PdfLayout::letter_landscape()?;
    render_with(stats, league, &mut layout)
}

/// Lay the report out on any backend: summary, one section per season, then records.
pub fn render_with(stats: &HistoryStats, league: &LeagueRef, out: &mut dyn LayoutBackend) -> HistoryResult<Vec<u8>> {
    write_summary(stats, league, out)?;
    for season in &stats.seasons {
        out.begin_page()?;
        let marker = match season.status {
            SeasonStatus::Complete => "",
            SeasonStatus::InProgress => " (in progress)",
            SeasonStatus::Unplayed => " (not played)",
        };
        out.heading(&format!("{} Season{}", season.year, marker))?;
        let champion = season.champion.as_deref().map(clean_text).unwrap_or_else(|| "-".to_string());
        out.line(&format!("Champion: {}", champion))?;
        let podium: Vec<String> = season
            .podium
            .iter()
            .enumerate()
            .map(|(i, owner)| format!("{}. {}", i + 1, clean_text(owner)))
            .collect();
        out.line(&format!("Podium: {}", podium.join("   ")))?;
        out.line(&format!("Games played: {}", season.games))?;
        out.line("")?;
        out.line(&format!(
            "{} {} {} {} {} {}",
            fit_right("Rk", 3),
            fit("Owner", 22),
            fit("Team", 28),
            fit_right("Record", 9),
            fit_right("PF", 9),
            fit_right("PA", 9)
        ))?;
        for row in &season.standings {
            out.line(&format!(
                "{} {} {} {} {} {}",
                fit_right(&row.rank.to_string(), 3),
                fit(&clean_text(&row.owner), 22),
                fit(&clean_text(&row.team_name), 28),
                fit_right(&format_record(row.wins, row.losses, row.ties), 9),
                fit_right(&format!("{:.2}", row.points_for), 9),
                fit_right(&format!("{:.2}", row.points_against), 9)
            ))?;
        }
    }
    write_records(stats, out)?;
    out.finish()
}

/// All-time table order: wins, then win percentage, then points, then name.
fn alltime_order(stats: &HistoryStats) -> Vec<&OwnerRecord> {
    let mut owners: Vec<&OwnerRecord> = stats.owner_alltime.values().collect();
    owners.sort_by(|a, b| {
        b.wins
            .cmp(&a.wins)
            .then_with(|| {
                win_percentage(b.wins, b.losses, b.ties).total_cmp(&win_percentage(a.wins, a.losses, a.ties))
            })
            .then_with(|| b.points_for.total_cmp(&a.points_for))
            .then_with(|| a.owner.cmp(&b.owner))
    });
    owners
}

fn write_summary(stats: &HistoryStats, league: &LeagueRef, out: &mut dyn LayoutBackend) -> HistoryResult<()> {
    out.begin_page()?;
    out.heading(&format!("{} - League History", clean_text(&league.display_name)))?;
    out.line(&format!("Source: {} (league {})", league.source.display_name(), clean_text(&league.external_id)))?;
    out.line(&format!("Seasons covered: {}", describe_years(&stats.years_covered)))?;
    out.line(&format!("Managers: {}", stats.owner_alltime.len()))?;
    out.line("")?;

    out.heading("Champions")?;
    for champion in &stats.champions {
        out.line(&format!("{}  {}", champion.year, clean_text(&champion.owner)))?;
    }
    out.line("")?;

    out.heading("All-Time Standings")?;
    out.line(&format!(
        "{} {} {} {} {} {} {}",
        fit("Owner", 22),
        fit_right("Seasons", 7),
        fit_right("Record", 10),
        fit_right("Win%", 6),
        fit_right("PF", 10),
        fit_right("PA", 10),
        fit_right("Titles", 6)
    ))?;
    for owner in alltime_order(stats) {
        out.line(&format!(
            "{} {} {} {} {} {} {}",
            fit(&clean_text(&owner.owner), 22),
            fit_right(&owner.seasons.to_string(), 7),
            fit_right(&format_record(owner.wins, owner.losses, owner.ties), 10),
            fit_right(&format!("{:.1}", win_percentage(owner.wins, owner.losses, owner.ties)), 6),
            fit_right(&format!("{:.2}", owner.points_for), 10),
            fit_right(&format!("{:.2}", owner.points_against), 10),
            fit_right(&owner.championships.to_string(), 6)
        ))?;
    }
    out.line("")?;

    out.heading("Championships & Playoffs")?;
    out.line(&format!(
        "{} {} {} {} {} {} {} {}",
        fit("Owner", 22),
        fit_right("1st", 4),
        fit_right("2nd", 4),
        fit_right("3rd", 4),
        fit_right("Podiums", 7),
        fit_right("Playoffs", 8),
        fit_right("Playoff Rec", 11),
        fit_right("Reg Rec", 9)
    ))?;
    let mut owners: Vec<&OwnerRecord> = stats.owner_alltime.values().collect();
    owners.sort_by(|a, b| {
        (b.championships, b.podiums(), b.playoff_appearances)
            .cmp(&(a.championships, a.podiums(), a.playoff_appearances))
            .then_with(|| a.owner.cmp(&b.owner))
    });
    for owner in owners {
        out.line(&format!(
            "{} {} {} {} {} {} {} {}",
            fit(&clean_text(&owner.owner), 22),
            fit_right(&owner.championships.to_string(), 4),
            fit_right(&owner.second_places.to_string(), 4),
            fit_right(&owner.third_places.to_string(), 4),
            fit_right(&owner.podiums().to_string(), 7),
            fit_right(&owner.playoff_appearances.to_string(), 8),
            fit_right(&format_record(owner.playoff_wins, owner.playoff_losses, owner.playoff_ties), 11),
            fit_right(&format_record(owner.wins, owner.losses, owner.ties), 9)
        ))?;
    }
    Ok(())
}

fn write_records(stats: &HistoryStats, out: &mut dyn LayoutBackend) -> HistoryResult<()> {
    out.begin_page()?;
    out.heading("All-Time Records")?;

    let records = &stats.records;
    if let Some(high) = &records.highest_score {
        out.line(&format!(
            "Highest score: {:.2} by {} vs {} ({} week {})",
            high.score, clean_text(&high.owner), clean_text(&high.opponent), high.year, high.week
        ))?;
    }
    if let Some(low) = &records.lowest_score {
        out.line(&format!(
            "Lowest score: {:.2} by {} vs {} ({} week {})",
            low.score, clean_text(&low.owner), clean_text(&low.opponent), low.year, low.week
        ))?;
    }
    if let Some(blowout) = &records.biggest_blowout {
        out.line(&format!(
            "Biggest blowout: {} {:.2} - {:.2} {} by {:.2} ({} week {})",
            clean_text(&blowout.winner), blowout.winner_score, blowout.loser_score,
            clean_text(&blowout.loser), blowout.margin, blowout.year, blowout.week
        ))?;
    }
    if let Some(closest) = &records.closest_game {
        out.line(&format!(
            "Closest game: {} {:.2} - {:.2} {} by {:.2} ({} week {})",
            clean_text(&closest.winner), closest.winner_score, closest.loser_score,
            clean_text(&closest.loser), closest.margin, closest.year, closest.week
        ))?;
    }
    for (label, streak) in [
        ("Longest win streak", &records.longest_win_streak),
        ("Longest losing streak", &records.longest_loss_streak),
    ] {
        if let Some(s) = streak {
            out.line(&format!(
                "{}: {} games by {} ({} wk {} to {} wk {})",
                label, s.length, clean_text(&s.owner), s.start.0, s.start.1, s.end.0, s.end.1
            ))?;
        }
    }
    out.line("")?;

    let boards = &stats.leaderboards;
    write_scores(out, "Highest Scores", &boards.high_scores)?;
    write_scores(out, "Lowest Scores", &boards.low_scores)?;
    write_margins(out, "Biggest Blowouts", &boards.blowouts)?;
    write_margins(out, "Closest Games", &boards.closest_games)?;
    write_streaks(out, "Longest Win Streaks", &boards.win_streaks)?;
    write_streaks(out, "Longest Losing Streaks", &boards.loss_streaks)?;

    out.begin_page()?;
    out.heading("Luck Analysis")?;
    out.line("Scores compared with the median score of their week.")?;
    out.line("")?;
    write_luck(out, "Unluckiest Losses", "lost", &stats.unlucky_losses)?;
    write_luck(out, "Luckiest Wins", "won", &stats.lucky_wins)?;

    out.heading("Points Against Leaders")?;
    out.line(&format!(
        "{} {} {} {} {} {}",
        fit("Year", 5),
        fit("Owner", 22),
        fit_right("PA", 9),
        fit_right("PA/G", 7),
        fit_right("Wins", 4),
        fit_right("vs Avg", 8)
    ))?;
    for leader in &stats.points_against_leaders {
        out.line(&format!(
            "{} {} {} {} {} {}",
            fit(&leader.year.to_string(), 5),
            fit(&clean_text(&leader.owner), 22),
            fit_right(&format!("{:.2}", leader.points_against), 9),
            fit_right(&format!("{:.2}", leader.per_game), 7),
            fit_right(&leader.wins.to_string(), 4),
            fit_right(&format!("{:+.2}", leader.above_average), 8)
        ))?;
    }
    out.line("")?;

    out.heading("Head-to-Head")?;
    for h2h in stats.head_to_head.values() {
        out.line(&format!(
            "{} {} {}  ({} games)",
            fit(&clean_text(&h2h.owner_a), 22),
            fit_right(&format_record(h2h.a_wins, h2h.b_wins, h2h.ties), 9),
            fit(&clean_text(&h2h.owner_b), 22),
            h2h.games()
        ))?;
    }
    out.line("")?;

    out.heading("All-Play Records")?;
    let mut all_play: Vec<_> = stats.all_play.values().collect();
    all_play.sort_by(|a, b| b.win_pct().total_cmp(&a.win_pct()).then_with(|| a.owner.cmp(&b.owner)));
    for record in all_play {
        out.line(&format!(
            "{} {} {}",
            fit(&clean_text(&record.owner), 22),
            fit_right(&format_record(record.wins, record.losses, record.ties), 12),
            fit_right(&format!("{:.3}", record.win_pct()), 6)
        ))?;
    }
    out.line("")?;

    out.heading("Scoring Consistency")?;
    out.line(&format!(
        "{} {} {} {} {} {} {}",
        fit("Year", 5),
        fit("Owner", 22),
        fit_right("Games", 5),
        fit_right("Mean", 8),
        fit_right("StdDev", 8),
        fit_right("Min", 8),
        fit_right("Max", 8)
    ))?;
    for row in &stats.consistency {
        out.line(&format!(
            "{} {} {} {} {} {} {}",
            fit(&row.year.to_string(), 5),
            fit(&clean_text(&row.owner), 22),
            fit_right(&row.games.to_string(), 5),
            fit_right(&format!("{:.2}", row.mean), 8),
            fit_right(&format!("{:.2}", row.std_dev), 8),
            fit_right(&format!("{:.2}", row.min), 8),
            fit_right(&format!("{:.2}", row.max), 8)
        ))?;
    }
    Ok(())
}

fn write_scores(out: &mut dyn LayoutBackend, title: &str, scores: &[GameScore]) -> HistoryResult<()> {
    out.heading(title)?;
    if scores.is_empty() {
        out.line("None")?;
    }
    for (i, s) in scores.iter().enumerate() {
        out.line(&format!(
            "{} {} {}  vs {} {}  {} wk {}",
            fit_right(&(i + 1).to_string(), 3),
            fit(&clean_text(&s.owner), 22),
            fit_right(&format!("{:.2}", s.score), 7),
            fit(&clean_text(&s.opponent), 22),
            fit_right(&format!("{:.2}", s.opponent_score), 7),
            s.year,
            s.week
        ))?;
    }
    out.line("")
}

fn write_margins(out: &mut dyn LayoutBackend, title: &str, games: &[GameMargin]) -> HistoryResult<()> {
    out.heading(title)?;
    if games.is_empty() {
        out.line("None")?;
    }
    for (i, g) in games.iter().enumerate() {
        out.line(&format!(
            "{} {} {} - {} {}  by {}  {} wk {}",
            fit_right(&(i + 1).to_string(), 3),
            fit(&clean_text(&g.winner), 22),
            fit_right(&format!("{:.2}", g.winner_score), 7),
            fit_right(&format!("{:.2}", g.loser_score), 7),
            fit(&clean_text(&g.loser), 22),
            fit_right(&format!("{:.2}", g.margin), 6),
            g.year,
            g.week
        ))?;
    }
    out.line("")
}

fn write_streaks(out: &mut dyn LayoutBackend, title: &str, streaks: &[Streak]) -> HistoryResult<()> {
    out.heading(title)?;
    if streaks.is_empty() {
        out.line("None")?;
    }
    for (i, s) in streaks.iter().enumerate() {
        out.line(&format!(
            "{} {} {} games  {} wk {} to {} wk {}",
            fit_right(&(i + 1).to_string(), 3),
            fit(&clean_text(&s.owner), 22),
            fit_right(&s.length.to_string(), 3),
            s.start.0,
            s.start.1,
            s.end.0,
            s.end.1
        ))?;
    }
    out.line("")
}

fn write_luck(out: &mut dyn LayoutBackend, title: &str, verb: &str, games: &[LuckGame]) -> HistoryResult<()> {
    out.heading(title)?;
    if games.is_empty() {
        out.line("None")?;
    }
    for g in games {
        out.line(&format!(
            "{} wk {}  {} {} {:.2} - {:.2} to {}  (median {:.2})",
            g.year,
            fit_right(&g.week.to_string(), 2),
            fit(&clean_text(&g.owner), 22),
            verb,
            g.score,
            g.opponent_score,
            clean_text(&g.opponent),
            g.week_median
        ))?;
    }
    out.line("")
}
