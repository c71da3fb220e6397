//! Completion policies
//!
//! A policy decides, from the text accumulated so far, when a device
//! response is complete. Policies are always evaluated against the whole
//! buffer so markers split across reads are still found.

use regex::Regex;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Prompt the Ameba console prints when it is ready for the next command
pub const DEFAULT_PROMPT: char = '#';

/// Default grace read after the end marker of a two-marker policy
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

/// Default idle threshold for record streams
pub const DEFAULT_IDLE: Duration = Duration::from_millis(1500);

/// Text pattern searched in the response buffer
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Case-sensitive substring
    Literal(String),
    /// ASCII case-insensitive substring
    IgnoreCase(String),
    /// Regular expression
    Regex(Regex),
}

impl Pattern {
    /// Case-sensitive substring pattern
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// ASCII case-insensitive substring pattern
    pub fn ignore_case(text: impl Into<String>) -> Self {
        Self::IgnoreCase(text.into())
    }

    /// Regular expression pattern
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Byte range of the first occurrence in `haystack`
    pub fn find(&self, haystack: &str) -> Option<(usize, usize)> {
        match self {
            Self::Literal(text) => haystack.find(text.as_str()).map(|i| (i, i + text.len())),
            Self::IgnoreCase(text) => {
                // ASCII lowering keeps byte offsets intact
                let needle = text.to_ascii_lowercase();
                haystack
                    .to_ascii_lowercase()
                    .find(&needle)
                    .map(|i| (i, i + needle.len()))
            }
            Self::Regex(re) => re.find(haystack).map(|m| (m.start(), m.end())),
        }
    }

    /// Whether the pattern occurs in `haystack`
    pub fn is_found(&self, haystack: &str) -> bool {
        self.find(haystack).is_some()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => write!(f, "{:?}", text),
            Self::IgnoreCase(text) => write!(f, "{:?} (any case)", text),
            Self::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

/// Recognizes one result record in streamed output
#[derive(Debug, Clone)]
pub enum RecordMatcher {
    /// Line starting with a digit and containing the separator
    /// (scan tables: `1\tAP\tMAC\tRSSI...`)
    Fields {
        /// Field separator
        separator: char,
    },
    /// Line containing a pattern
    Line(Pattern),
}

impl Default for RecordMatcher {
    fn default() -> Self {
        Self::Fields { separator: '\t' }
    }
}

impl RecordMatcher {
    /// Whether a single line is a record
    pub fn is_record(&self, line: &str) -> bool {
        match self {
            Self::Fields { separator } => {
                let trimmed = line.trim();
                trimmed.contains(*separator)
                    && trimmed.chars().next().is_some_and(|c| c.is_ascii_digit())
            }
            Self::Line(pattern) => pattern.is_found(line),
        }
    }

    /// Number of records in `text`
    pub fn count(&self, text: &str) -> usize {
        text.lines().filter(|line| self.is_record(line)).count()
    }
}

/// How to decide that a response is complete
#[derive(Debug, Clone)]
pub enum CompletionPolicy {
    /// Buffer, minus trailing whitespace, ends with the prompt character
    PromptSuffix {
        /// Prompt character
        prompt: char,
    },
    /// Pattern appears anywhere in the buffer
    WaitForPattern(Pattern),
    /// `start` appears, then `end` appears after it; one grace read follows
    WaitForPatternThenPattern {
        /// Marker that opens the interesting section
        start: Pattern,
        /// Marker that closes it
        end: Pattern,
        /// Upper bound of the trailing grace read
        grace: Duration,
    },
    /// `marker` appears; records seen on the way are counted
    CountUntil {
        /// Marker that ends the response
        marker: Pattern,
        /// What to count
        matcher: RecordMatcher,
    },
    /// No new record for `idle` after at least one record was seen
    IdleAfterMatches {
        /// Record recognizer
        matcher: RecordMatcher,
        /// Idle threshold
        idle: Duration,
    },
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::prompt()
    }
}

impl CompletionPolicy {
    /// Prompt policy with the default `#` prompt
    pub fn prompt() -> Self {
        Self::PromptSuffix {
            prompt: DEFAULT_PROMPT,
        }
    }

    /// Wait until `pattern` shows up
    pub fn wait_for(pattern: Pattern) -> Self {
        Self::WaitForPattern(pattern)
    }

    /// Collect from `start` until `end`, with the default grace read
    pub fn collect_until(start: Pattern, end: Pattern) -> Self {
        Self::WaitForPatternThenPattern {
            start,
            end,
            grace: DEFAULT_GRACE,
        }
    }

    /// Wait for `marker`, counting lines that contain `counted`
    pub fn count_until(marker: Pattern, counted: Pattern) -> Self {
        Self::CountUntil {
            marker,
            matcher: RecordMatcher::Line(counted),
        }
    }

    /// Idle heuristic over tab-separated numbered records
    pub fn idle_after_records(idle: Duration) -> Self {
        Self::IdleAfterMatches {
            matcher: RecordMatcher::default(),
            idle,
        }
    }

    /// Upper bound for a single read attempt under this policy
    pub fn poll_interval(&self) -> Duration {
        match self {
            Self::PromptSuffix { .. } => Duration::from_millis(100),
            Self::WaitForPattern(_)
            | Self::WaitForPatternThenPattern { .. }
            | Self::CountUntil { .. } => Duration::from_millis(250),
            Self::IdleAfterMatches { .. } => Duration::from_millis(500),
        }
    }

    /// Short name used in logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::PromptSuffix { .. } => "prompt",
            Self::WaitForPattern(_) => "wait-for",
            Self::WaitForPatternThenPattern { .. } => "collect-until",
            Self::CountUntil { .. } => "count-until",
            Self::IdleAfterMatches { .. } => "idle-after-matches",
        }
    }

    /// Shape the text of a successful response.
    ///
    /// The prompt policy trims and drops the trailing prompt; every other
    /// policy hands back the raw text.
    pub fn finish(&self, text: String) -> String {
        match self {
            Self::PromptSuffix { prompt } => {
                let trimmed = text.trim_end();
                let trimmed = trimmed.strip_suffix(*prompt).unwrap_or(trimmed);
                trimmed.trim().to_string()
            }
            _ => text,
        }
    }
}

/// Result of evaluating a policy against the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep reading
    Pending,
    /// Response complete
    Complete,
    /// Complete after one more read bounded by the given duration
    Grace(Duration),
}

/// Evaluation state of one policy over one exchange
#[derive(Debug)]
pub struct PolicyState<'a> {
    policy: &'a CompletionPolicy,
    matches: usize,
    last_match_at: Option<Instant>,
    fresh_match: bool,
}

impl<'a> PolicyState<'a> {
    /// Fresh state for `policy`
    pub fn new(policy: &'a CompletionPolicy) -> Self {
        Self {
            policy,
            matches: 0,
            last_match_at: None,
            fresh_match: false,
        }
    }

    /// Re-evaluate against the entire buffer at time `now`
    pub fn evaluate(&mut self, buffer: &str, now: Instant) -> Progress {
        match self.policy {
            CompletionPolicy::PromptSuffix { prompt } => {
                if buffer.trim_end().ends_with(*prompt) {
                    Progress::Complete
                } else {
                    Progress::Pending
                }
            }
            CompletionPolicy::WaitForPattern(pattern) => {
                if pattern.is_found(buffer) {
                    Progress::Complete
                } else {
                    Progress::Pending
                }
            }
            CompletionPolicy::WaitForPatternThenPattern { start, end, grace } => {
                match start.find(buffer) {
                    Some((_, after_start)) if end.is_found(&buffer[after_start..]) => {
                        Progress::Grace(*grace)
                    }
                    _ => Progress::Pending,
                }
            }
            CompletionPolicy::CountUntil { marker, matcher } => {
                self.matches = matcher.count(buffer);
                if marker.is_found(buffer) {
                    Progress::Complete
                } else {
                    Progress::Pending
                }
            }
            CompletionPolicy::IdleAfterMatches { matcher, idle } => {
                let count = matcher.count(buffer);
                self.fresh_match = count > self.matches;
                if self.fresh_match {
                    self.matches = count;
                    self.last_match_at = Some(now);
                }

                match self.last_match_at {
                    Some(at) if now.saturating_duration_since(at) >= *idle => Progress::Complete,
                    _ => Progress::Pending,
                }
            }
        }
    }

    /// When the idle threshold will be crossed if no further record arrives
    pub fn idle_deadline(&self) -> Option<Instant> {
        match self.policy {
            CompletionPolicy::IdleAfterMatches { idle, .. } => {
                self.last_match_at.map(|at| at + *idle)
            }
            _ => None,
        }
    }

    /// Whether hitting the outer timeout still counts as a finished stream:
    /// records were seen and the last read brought no new one.
    pub fn settled_at_timeout(&self) -> bool {
        matches!(self.policy, CompletionPolicy::IdleAfterMatches { .. })
            && self.matches > 0
            && !self.fresh_match
    }

    /// Records counted so far (idle-after-matches and count-until)
    pub fn matches(&self) -> usize {
        self.matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_find() {
        let lit = Pattern::literal("done!");
        assert_eq!(lit.find("scan done!\n"), Some((5, 10)));
        assert!(lit.find("scan DONE!").is_none());

        let any = Pattern::ignore_case("KVS start 30s recording");
        assert!(any.is_found("[KVS] kvs start 30s recording now"));

        let re = Pattern::regex(r"sd:/IMAGE/(\d+)\.jpg").unwrap();
        assert_eq!(re.find("jpeg sd:/IMAGE/12.jpg"), Some((5, 21)));
        assert!(Pattern::regex("(").is_err());
    }

    #[test]
    fn test_record_matcher() {
        let matcher = RecordMatcher::default();
        assert!(matcher.is_record("1\tInfra\t00:e0:4c:01:02:03\t-45\t6\t20\tWPA2\tHome"));
        assert!(matcher.is_record("  12\tx"));
        assert!(!matcher.is_record("ATWS\t"));
        assert!(!matcher.is_record("1 no tabs here"));
        assert!(!matcher.is_record(""));
        assert_eq!(matcher.count("_SCAN_\n1\tA\n2\tB\n[MEM] 1234\n#"), 2);

        let fragments = RecordMatcher::Line(Pattern::ignore_case("fragment"));
        assert_eq!(fragments.count("Fragment 1 sent\nfragment 2 sent\nother"), 2);
    }

    #[test]
    fn test_prompt_suffix() {
        let policy = CompletionPolicy::prompt();
        let mut state = PolicyState::new(&policy);
        let now = Instant::now();
        assert_eq!(state.evaluate("OK\r\n", now), Progress::Pending);
        assert_eq!(state.evaluate("OK\r\n#", now), Progress::Complete);
        assert_eq!(state.evaluate("OK\r\n# \r\n", now), Progress::Complete);
        assert_eq!(policy.finish("\r\nOK\r\n#\r\n".to_string()), "OK");
    }

    #[test]
    fn test_wait_for_pattern() {
        let policy = CompletionPolicy::wait_for(Pattern::literal("capture_snapshot_cb"));
        let mut state = PolicyState::new(&policy);
        let now = Instant::now();
        assert_eq!(state.evaluate("SNAP=SNAPS\r\ncapture_snap", now), Progress::Pending);
        assert_eq!(
            state.evaluate("SNAP=SNAPS\r\ncapture_snapshot_cb done", now),
            Progress::Complete
        );
        // Non-prompt policies keep the raw text
        assert_eq!(policy.finish("a\r\n#".to_string()), "a\r\n#");
    }

    #[test]
    fn test_end_marker_must_follow_start() {
        let policy =
            CompletionPolicy::collect_until(Pattern::literal("_SCAN_"), Pattern::literal("done!"));
        let mut state = PolicyState::new(&policy);
        let now = Instant::now();
        assert_eq!(state.evaluate("done!\n", now), Progress::Pending);
        assert_eq!(state.evaluate("done!\n_SCAN_\n1\tA\n", now), Progress::Pending);
        assert_eq!(
            state.evaluate("done!\n_SCAN_\n1\tA\ndone!", now),
            Progress::Grace(DEFAULT_GRACE)
        );
    }

    #[test]
    fn test_count_until_marker() {
        let policy = CompletionPolicy::count_until(
            Pattern::ignore_case("sending end of frames done!"),
            Pattern::ignore_case("fragment"),
        );
        let mut state = PolicyState::new(&policy);
        let now = Instant::now();
        assert_eq!(state.evaluate("put Fragment 1\nput frag", now), Progress::Pending);
        assert_eq!(state.matches(), 1);
        assert_eq!(state.evaluate("put Fragment 1\nput fragment 2\n", now), Progress::Pending);
        assert_eq!(state.matches(), 2);
        assert_eq!(
            state.evaluate("put Fragment 1\nput fragment 2\nSending END of frames done!", now),
            Progress::Complete
        );
        assert_eq!(state.matches(), 2);
        assert!(!state.settled_at_timeout());
    }

    #[test]
    fn test_idle_after_matches() {
        let policy = CompletionPolicy::idle_after_records(Duration::from_millis(1500));
        let mut state = PolicyState::new(&policy);
        let t0 = Instant::now();

        // Noise alone never starts the idle clock
        assert_eq!(state.evaluate("ATWS\r\n", t0), Progress::Pending);
        assert!(state.idle_deadline().is_none());
        assert!(!state.settled_at_timeout());

        let t1 = t0 + Duration::from_millis(300);
        assert_eq!(state.evaluate("ATWS\r\n1\tA\n", t1), Progress::Pending);
        assert_eq!(state.matches(), 1);
        assert_eq!(state.idle_deadline(), Some(t1 + Duration::from_millis(1500)));
        assert!(!state.settled_at_timeout());

        // Keepalive noise does not reset the idle clock
        let t2 = t1 + Duration::from_millis(1000);
        assert_eq!(state.evaluate("ATWS\r\n1\tA\n[MEM]\n", t2), Progress::Pending);
        assert!(state.settled_at_timeout());

        let t3 = t1 + Duration::from_millis(1500);
        assert_eq!(state.evaluate("ATWS\r\n1\tA\n[MEM]\n", t3), Progress::Complete);
        assert_eq!(state.matches(), 1);
    }
}
