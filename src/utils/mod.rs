use std::collections::BTreeSet;

/// Cross-season join key for an owner: trimmed and case-folded.
pub fn owner_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Reduce a string to printable ASCII, falling back to "Unknown" when nothing is left.
pub fn clean_text(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '?') {
        "Unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Format a win/loss/tie record as "W-L" or "W-L-T" when ties exist
pub fn format_record(wins: u32, losses: u32, ties: u32) -> String {
    if ties > 0 {
        format!("{}-{}-{}", wins, losses, ties)
    } else {
        format!("{}-{}", wins, losses)
    }
}

/// Win percentage with ties counted as half a win
pub fn win_percentage(wins: u32, losses: u32, ties: u32) -> f64 {
    let total = wins + losses + ties;
    if total == 0 {
        return 0.0;
    }
    (wins as f64 + 0.5 * ties as f64) / total as f64 * 100.0
}

/// Describe a set of years as a span plus any holes, e.g. "2016-2023 (missing 2019)"
pub fn describe_years(years: &BTreeSet<i32>) -> String {
    let (Some(first), Some(last)) = (years.first(), years.last()) else {
        return "none".to_string();
    };
    if first == last {
        return first.to_string();
    }

    let missing: Vec<String> = (*first..=*last)
        .filter(|y| !years.contains(y))
        .map(|y| y.to_string())
        .collect();

    if missing.is_empty() {
        format!("{}-{}", first, last)
    } else {
        format!("{}-{} (missing {})", first, last, missing.join(", "))
    }
}

/// Fit a cell to an exact width: truncate with '~' or pad with spaces.
pub fn fit(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len > width {
        let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
        out.push('~');
        out
    } else {
        format!("{}{}", text, " ".repeat(width - len))
    }
}

/// Right-align a cell to an exact width.
pub fn fit_right(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        fit(text, width)
    } else {
        format!("{}{}", " ".repeat(width - len), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_key_folds_case_and_whitespace() {
        assert_eq!(owner_key("  Big  Mike "), "big mike");
        assert_eq!(owner_key("BIG MIKE"), owner_key("big mike"));
        assert_ne!(owner_key("Mike"), owner_key("Michael"));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("José"), "Jos?");
        assert_eq!(clean_text("   "), "Unknown");
        assert_eq!(clean_text("🏈🏈"), "Unknown");
        assert_eq!(clean_text(" Team 7 "), "Team 7");
    }

    #[test]
    fn test_format_record() {
        assert_eq!(format_record(10, 3, 0), "10-3");
        assert_eq!(format_record(9, 3, 1), "9-3-1");
    }

    #[test]
    fn test_win_percentage() {
        assert_eq!(win_percentage(3, 1, 0), 75.0);
        assert!((win_percentage(1, 0, 2) - 66.667).abs() < 0.001);
        assert_eq!(win_percentage(0, 0, 0), 0.0);
    }

    #[test]
    fn test_describe_years() {
        let years: BTreeSet<i32> = [2016, 2017, 2018, 2020].into_iter().collect();
        assert_eq!(describe_years(&years), "2016-2020 (missing 2019)");
        let single: BTreeSet<i32> = [2021].into_iter().collect();
        assert_eq!(describe_years(&single), "2021");
        assert_eq!(describe_years(&BTreeSet::new()), "none");
    }

    #[test]
    fn test_fit() {
        assert_eq!(fit("abc", 5), "abc  ");
        assert_eq!(fit("abcdefgh", 5), "abcd~");
        assert_eq!(fit_right("42", 4), "  42");
    }
}
