//! Results-page parser.
//!
//! Extracts the round selector and the fixtures table from one document.
//! Structural drift never raises: a missing table yields no matches and an
//! unusable row is counted in `skipped_rows`.
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

use crate::storage::{Match, Round, Score};
use crate::util::{normalize_text, numeric_segment, resolve_link};

/// Date heading used when the page leaves it blank.
pub const UNDATED: &str = "Datum ni določen";
/// Placeholder for an unplayed or unreadable score.
pub const NOT_PLAYED: &str = "N/P";
/// Round label when nothing on the page identifies the round.
pub const UNKNOWN_ROUND: &str = "N/A";

const MISSING: &str = "N/A";
const POSTPONED: &str = "preloženo";
const MIN_CELLS: usize = 10;

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| unreachable!("invalid built-in selector {css}"))
}

static ROUND_OPTION: LazyLock<Selector> = LazyLock::new(|| selector("select#select-round option"));
static RESULTS_TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table.fixtures-results"));
static CONTENT_HEADING: LazyLock<Selector> = LazyLock::new(|| selector("td.contentheading"));
static HEADER_CELL: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static TIME: LazyLock<Selector> = LazyLock::new(|| selector("abbr.dtstart"));
static SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span"));
static LINK: LazyLock<Selector> = LazyLock::new(|| selector("a"));
static SCORE_SPAN: LazyLock<Selector> = LazyLock::new(|| selector("span[class^=\"score\"]"));

static SCORE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*[-–:]\s*(\d+)\s*$").unwrap_or_else(|_| unreachable!())
});
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{2}\.\d{2}\.\d{4})").unwrap_or_else(|_| unreachable!()));
static HEADING_ROUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Rezultati kroga - (\d+\. krog)").unwrap_or_else(|_| unreachable!())
});

/// Where the page came from and how its rows should be stamped.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub league: &'a str,
    /// URL the page was requested from; option links resolve against it
    pub page_url: &'a Url,
    /// Label to fall back on when the page itself does not name the round
    pub known_label: Option<&'a str>,
    pub fetched_at: i64,
}

/// Everything extracted from one results page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPage {
    /// Round selector entries in document order
    pub rounds: Vec<Round>,
    /// The selector entry flagged `selected`, if any
    pub selected: Option<Round>,
    pub round_label: String,
    pub matches: Vec<Match>,
    /// Data rows that could not be turned into a match
    pub skipped_rows: usize,
    /// False when the fixtures table is absent altogether
    pub has_results_table: bool,
}

/// Parse a score cell. `None` means unplayed (or unreadable).
///
/// Accepts `-`, `–` or `:` between the numbers, with any surrounding
/// whitespace.
pub fn parse_score(text: &str) -> Option<Score> {
    let cleaned = normalize_text(text);
    let lowered = cleaned.to_lowercase();
    if matches!(lowered.as_str(), "" | "n/p" | "_ - _" | "-" | POSTPONED) {
        return None;
    }

    let caps = SCORE_PATTERN.captures(&cleaned)?;
    let home = caps.get(1)?.as_str().parse().ok()?;
    let away = caps.get(2)?.as_str().parse().ok()?;
    Some(Score { home, away })
}

/// First `dd.mm.yyyy` date inside a heading such as "Sobota, 12.10.2024".
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let found = DATE_PATTERN.find(text)?;
    NaiveDate::parse_from_str(found.as_str(), "%d.%m.%Y").ok()
}

pub fn parse_page(html: &str, ctx: &ParseContext<'_>) -> ParsedPage {
    let document = Html::parse_document(html);

    let (rounds, selected) = extract_rounds(&document, ctx.page_url);
    let round_label = resolve_label(&document, &rounds, selected.as_ref(), ctx);

    let mut page = ParsedPage {
        rounds,
        selected,
        round_label,
        ..ParsedPage::default()
    };

    if let Some(table) = document.select(&RESULTS_TABLE).next() {
        page.has_results_table = true;
        extract_matches(table, ctx, &mut page);
    }

    if page.skipped_rows > 0 {
        tracing::debug!(url = %ctx.page_url, skipped = page.skipped_rows, "Skipped unusable fixture rows");
    }
    page
}

fn extract_rounds(document: &Html, page_url: &Url) -> (Vec<Round>, Option<Round>) {
    let mut rounds = Vec::new();
    let mut selected = None;
    let mut seen = HashSet::new();

    for option in document.select(&ROUND_OPTION) {
        let label = normalize_text(&option.text().collect::<String>());
        let Some(href) = option.value().attr("value") else {
            continue;
        };
        if label.is_empty() || href.trim().is_empty() {
            continue;
        }
        let Some(url) = resolve_link(page_url, href) else {
            continue;
        };

        let round = Round {
            label,
            opaque_id: numeric_segment(&url),
            source_url: url.to_string(),
        };
        if option.value().attr("selected").is_some() && selected.is_none() {
            selected = Some(round.clone());
        }
        if seen.insert(round.source_url.clone()) {
            rounds.push(round);
        }
    }

    (rounds, selected)
}

fn resolve_label(
    document: &Html,
    rounds: &[Round],
    selected: Option<&Round>,
    ctx: &ParseContext<'_>,
) -> String {
    if let Some(round) = selected {
        return round.label.clone();
    }
    if let Some(round) = rounds.iter().find(|r| r.source_url == ctx.page_url.as_str()) {
        return round.label.clone();
    }
    if let Some(label) = heading_label(document) {
        return label;
    }
    ctx.known_label.unwrap_or(UNKNOWN_ROUND).to_string()
}

fn heading_label(document: &Html) -> Option<String> {
    let heading = document
        .select(&CONTENT_HEADING)
        .map(|td| normalize_text(&td.text().collect::<String>()))
        .find(|text| text.contains("Rezultati kroga -"))?;

    if let Some(caps) = HEADING_ROUND.captures(&heading) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    let remainder = heading.replace("Rezultati kroga -", "");
    let remainder = remainder.split('(').next().unwrap_or_default().trim();
    remainder.contains("krog").then(|| remainder.to_string())
}

fn extract_matches(table: ElementRef<'_>, ctx: &ParseContext<'_>, page: &mut ParsedPage) {
    let mut date_text = UNDATED.to_string();
    let mut date = None;

    for row in direct_rows(table) {
        let classes: Vec<&str> = row.value().classes().collect();
        if classes.contains(&"sectiontableheader") {
            date_text = row
                .select(&HEADER_CELL)
                .next()
                .map(|th| normalize_text(&th.text().collect::<String>()))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| UNDATED.to_string());
            date = parse_date(&date_text);
            continue;
        }
        if !classes
            .iter()
            .any(|c| *c == "sectiontableentry1" || *c == "sectiontableentry2")
        {
            continue;
        }

        match parse_row(row, ctx, &page.round_label, &date_text, date) {
            Some(m) => page.matches.push(m),
            None => page.skipped_rows += 1,
        }
    }
}

fn parse_row(
    row: ElementRef<'_>,
    ctx: &ParseContext<'_>,
    round_label: &str,
    date_text: &str,
    date: Option<NaiveDate>,
) -> Option<Match> {
    let cells: Vec<ElementRef<'_>> = row
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "td")
        .collect();
    if cells.len() < MIN_CELLS {
        return None;
    }

    let home_team = first_text(cells[3], &SPAN)?;
    let away_team = first_text(cells[7], &SPAN)?;
    let time_text = first_text(cells[1], &TIME).unwrap_or_else(|| MISSING.to_string());
    let venue = first_text(cells[9], &LINK).unwrap_or_else(|| MISSING.to_string());
    let score_text = score_cell_text(cells[5]);
    let parsed_score = parse_score(&score_text);

    Some(Match {
        unique_id: Match::unique_id_for(ctx.league, &home_team, &away_team, round_label, date_text),
        league: ctx.league.to_string(),
        round_label: round_label.to_string(),
        round_url: ctx.page_url.to_string(),
        date_text: date_text.to_string(),
        date,
        time_text,
        home_team,
        away_team,
        score_text,
        parsed_score,
        venue,
        fetched_at: ctx.fetched_at,
    })
}

/// Score cell text, collapsed to "N/P" unless it carries digits or a
/// postponement note.
fn score_cell_text(cell: ElementRef<'_>) -> String {
    let Some(link) = cell.select(&LINK).next() else {
        return NOT_PLAYED.to_string();
    };
    let Some(span) = link.select(&SCORE_SPAN).next() else {
        return NOT_PLAYED.to_string();
    };

    let raw = normalize_text(&span.text().collect::<String>());
    if raw.chars().any(|c| c.is_ascii_digit()) || raw.to_lowercase().contains(POSTPONED) {
        raw
    } else {
        NOT_PLAYED.to_string()
    }
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .next()
        .map(|e| normalize_text(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// `tr` children of the table itself, looking through row groups but never
/// into nested tables.
fn direct_rows(table: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    let mut rows = Vec::new();
    for child in table.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "tr" => rows.push(child),
            "thead" | "tbody" | "tfoot" => rows.extend(
                child
                    .children()
                    .filter_map(ElementRef::wrap)
                    .filter(|e| e.value().name() == "tr"),
            ),
            _ => {}
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn data_row(time: &str, home: &str, score: &str, away: &str, venue: &str) -> String {
        format!(
            r#"<tr class="sectiontableentry1">
                <td></td><td><abbr class="dtstart">{time}</abbr></td><td></td>
                <td><span>{home}</span></td><td></td>
                <td><a href="/m/1"><span class="score_home">{score}</span></a></td><td></td>
                <td><span>{away}</span></td><td></td>
                <td><a href="/v/1">{venue}</a></td>
            </tr>"#
        )
    }

    fn page(options: &str, rows: &str) -> String {
        format!(
            r#"<html><body>
            <select id="select-round">{options}</select>
            <table class="fixtures-results">{rows}</table>
            </body></html>"#
        )
    }

    fn ctx(url: &Url) -> ParseContext<'_> {
        ParseContext {
            league: "liga_a",
            page_url: url,
            known_label: None,
            fetched_at: 1_700_000_000,
        }
    }

    fn base() -> Url {
        Url::parse("https://www.lmn-radgona.si/index.php/ct-menu-item-7/razpored-liga-a").unwrap()
    }

    #[test]
    fn test_parse_score_cases() {
        assert_eq!(parse_score("2 - 1"), Some(Score { home: 2, away: 1 }));
        assert_eq!(parse_score("3-0"), Some(Score { home: 3, away: 0 }));
        assert_eq!(parse_score(" 4\u{a0}:\u{a0}4 "), Some(Score { home: 4, away: 4 }));
        assert_eq!(parse_score("1 – 2"), Some(Score { home: 1, away: 2 }));
        assert_eq!(parse_score("N/P"), None);
        assert_eq!(parse_score("_ - _"), None);
        assert_eq!(parse_score("Preloženo"), None);
        assert_eq!(parse_score("-"), None);
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("2 - 1 (pp)"), None);
        assert_eq!(parse_score("99999999999 - 1"), None);
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("Sobota, 12.10.2024"),
            NaiveDate::from_ymd_opt(2024, 10, 12)
        );
        assert_eq!(parse_date(UNDATED), None);
        assert_eq!(parse_date("31.02.2024"), None);
    }

    #[test]
    fn test_full_page() {
        let options = r#"
            <option value="/index.php/razpored/587/1-krog">1. krog</option>
            <option value="/index.php/razpored/588/2-krog" selected="selected">2. krog</option>
            <option value="">   </option>"#;
        let rows = format!(
            r#"<tbody>
            <tr class="sectiontableheader"><th>Sobota, 12.10.2024</th></tr>
            {}
            {}
            <tr class="sectiontableheader"><th></th></tr>
            {}
            <tr class="sectiontableentry1"><td>too</td><td>short</td></tr>
            </tbody>"#,
            data_row("18:00", "Ekipa A", "2&nbsp;-&nbsp;1", "Ekipa B", "Igrišče Radgona"),
            data_row("19:00", "Ekipa C", "_ - _", "Ekipa D", "Igrišče Gornja"),
            data_row("", "Ekipa E", "preloženo", "Ekipa F", ""),
        );
        let url = base();
        let parsed = parse_page(&page(options, &rows), &ctx(&url));

        assert!(parsed.has_results_table);
        assert_eq!(parsed.rounds.len(), 2);
        assert_eq!(
            parsed.rounds[0].source_url,
            "https://www.lmn-radgona.si/index.php/razpored/587/1-krog"
        );
        assert_eq!(parsed.rounds[0].opaque_id.as_deref(), Some("587"));
        assert_eq!(parsed.selected.as_ref().map(|r| r.label.as_str()), Some("2. krog"));
        assert_eq!(parsed.round_label, "2. krog");
        assert_eq!(parsed.skipped_rows, 1);
        assert_eq!(parsed.matches.len(), 3);

        let first = &parsed.matches[0];
        assert_eq!(first.home_team, "Ekipa A");
        assert_eq!(first.score_text, "2 - 1");
        assert_eq!(first.parsed_score, Some(Score { home: 2, away: 1 }));
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 10, 12));
        assert_eq!(first.venue, "Igrišče Radgona");
        assert_eq!(
            first.unique_id,
            "liga_a_Ekipa A_Ekipa B_2. krog_Sobota, 12.10.2024"
        );

        let second = &parsed.matches[1];
        assert_eq!(second.score_text, NOT_PLAYED);
        assert_eq!(second.parsed_score, None);

        let third = &parsed.matches[2];
        assert_eq!(third.date_text, UNDATED);
        assert_eq!(third.date, None);
        assert_eq!(third.score_text, "preloženo");
        assert_eq!(third.parsed_score, None);
        assert_eq!(third.time_text, "N/A");
        assert_eq!(third.venue, "N/A");
    }

    #[test]
    fn test_row_without_team_is_skipped() {
        let rows = data_row("18:00", "", "1 - 0", "Ekipa B", "V");
        let url = base();
        let parsed = parse_page(&page("", &rows), &ctx(&url));
        assert!(parsed.matches.is_empty());
        assert_eq!(parsed.skipped_rows, 1);
    }

    #[test]
    fn test_missing_table_is_not_an_error() {
        let url = base();
        let parsed = parse_page("<html><body><p>Vzdrževanje</p></body></html>", &ctx(&url));
        assert!(!parsed.has_results_table);
        assert!(parsed.matches.is_empty());
        assert!(parsed.rounds.is_empty());
        assert_eq!(parsed.round_label, UNKNOWN_ROUND);
    }

    #[test]
    fn test_label_from_url_match() {
        let url = Url::parse("https://www.lmn-radgona.si/r/2").unwrap();
        let options = r#"<option value="/r/1">1. krog</option><option value="/r/2">2. krog</option>"#;
        let parsed = parse_page(&page(options, ""), &ctx(&url));
        assert!(parsed.selected.is_none());
        assert_eq!(parsed.round_label, "2. krog");
    }

    #[test]
    fn test_label_from_heading() {
        let html = r#"<html><body><table><tr>
            <td class="contentheading">Rezultati kroga - 7. krog (Liga A)</td>
            </tr></table></body></html>"#;
        let url = base();
        assert_eq!(parse_page(html, &ctx(&url)).round_label, "7. krog");

        let html = r#"<html><body><table><tr>
            <td class="contentheading">Rezultati kroga - Zadnji krog (finale)</td>
            </tr></table></body></html>"#;
        assert_eq!(parse_page(html, &ctx(&url)).round_label, "Zadnji krog");
    }

    #[test]
    fn test_known_label_is_last_resort() {
        let url = base();
        let context = ParseContext {
            known_label: Some("5. krog"),
            ..ctx(&url)
        };
        let rows = data_row("18:00", "A", "1-1", "B", "V");
        let parsed = parse_page(&page("", &rows), &context);
        assert_eq!(parsed.round_label, "5. krog");
        assert_eq!(parsed.matches[0].round_label, "5. krog");
    }

    #[test]
    fn test_nested_tables_are_ignored() {
        let rows = format!(
            "<tr><td><table>{}</table></td></tr>",
            data_row("18:00", "A", "1-0", "B", "V")
        );
        let url = base();
        let parsed = parse_page(&page("", &rows), &ctx(&url));
        assert!(parsed.matches.is_empty());
        assert_eq!(parsed.skipped_rows, 0);
    }

    proptest! {
        #[test]
        fn prop_parse_score_never_panics(s in "\\PC*") {
            let _ = parse_score(&s);
        }

        #[test]
        fn prop_numeric_scores_roundtrip(home in 0u32..100, away in 0u32..100, sep in "[-–:]") {
            let text = format!("{home} {sep} {away}");
            prop_assert_eq!(parse_score(&text), Some(Score { home, away }));
        }
    }
}
