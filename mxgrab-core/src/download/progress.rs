use std::sync::OnceLock;

use regex::Regex;

fn progress_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*\[download\]\s+(\d+(?:\.\d+)?)%").expect("progress pattern is valid")
    })
}

/// Percentage carried by a `[download] 42.0% of ...` line, clamped to 0..=100.
pub fn parse_progress_percent(line: &str) -> Option<f64> {
    let captures = progress_regex().captures(line)?;
    captures
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
        .map(|p| p.clamp(0.0, 100.0))
}

/// Whether a helper line is worth keeping as failure detail.
pub fn is_error_line(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("ERROR") || trimmed.to_ascii_lowercase().contains("error:")
}

/// Linear map of helper percentages onto a slice of the session's overall
/// progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressRange {
    start: f64,
    end: f64,
}

impl ProgressRange {
    pub fn new(start: f64, end: f64) -> Self {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        Self { start, end }
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn remap(&self, percent: f64) -> f64 {
        self.start + (percent.clamp(0.0, 100.0) / 100.0) * (self.end - self.start)
    }
}

impl From<[f64; 2]> for ProgressRange {
    fn from([start, end]: [f64; 2]) -> Self {
        Self::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_helper_progress_lines() {
        assert_eq!(
            parse_progress_percent("[download]  42.7% of ~12.00MiB at 1.20MiB/s ETA 00:07"),
            Some(42.7)
        );
        assert_eq!(parse_progress_percent("[download] 100% of 12.00MiB"), Some(100.0));
        assert_eq!(parse_progress_percent("[download]   0.0% of ~1MiB"), Some(0.0));
    }

    #[test]
    fn ignores_other_lines() {
        assert_eq!(parse_progress_percent("[download] Destination: out.mp4"), None);
        assert_eq!(parse_progress_percent("[hlsnative] Total fragments: 12"), None);
        assert_eq!(parse_progress_percent("progress 50%"), None);
    }

    #[test]
    fn default_range_maps_into_half_to_ninety() {
        let range = ProgressRange::from([0.5, 0.9]);
        assert!((range.remap(0.0) - 0.5).abs() < f64::EPSILON);
        assert!((range.remap(50.0) - 0.7).abs() < 1e-9);
        assert!((range.remap(100.0) - 0.9).abs() < 1e-9);
        assert!((range.remap(250.0) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn error_lines_are_recognised() {
        assert!(is_error_line("ERROR: unable to download video data: HTTP Error 403"));
        assert!(!is_error_line("[download] 10.0% of 3MiB"));
    }
}
