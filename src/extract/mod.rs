//! Pull named sections out of worker stdout and tidy them for display.

use std::sync::LazyLock;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::{ser::SerializeMap, Serialize, Serializer};

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)|[@-Z\\-_])")
        .expect("valid regex")
});
static TRAILING_BLANKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)[ \t]+$").expect("valid regex"));
static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static LEADING_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(?:date:|(?:(?:mon|tue|wed|thu|fri|sat|sun)[a-z]*,?\s+)?(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+\d{1,2}\b|\d{1,2}\s+(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\b|\d{1,4}[/.\-]\d{1,2}[/.\-]\d{1,4})",
    )
    .expect("valid regex")
});

/// Phrases that mark where email-like prose begins when a worker printed no
/// section headers.
pub const DEFAULT_CUES: &[&str] = &[
    "Subject:",
    "Dear ",
    "Hello",
    "Hi ",
    "Hey ",
    "Greetings",
    "To whom it may concern",
    "Best regards",
    "Kind regards",
    "Regards,",
    "Sincerely",
];

/// Section name → cleaned text, in pattern order, plus any error the worker
/// reported in place of content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSections {
    entries: Vec<(String, String)>,
    reported_error: Option<String>,
}

impl ExtractedSections {
    pub fn new() -> Self {
        Self::default()
    }

    /// No content: the worker printed an error document instead.
    pub fn reported_error(message: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            reported_error: Some(message.into()),
        }
    }

    /// Insert or replace `name`. Empty text is not stored.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        let (name, text) = (name.into(), text.into());
        if text.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = text,
            None => self.entries.push((name, text)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn worker_error(&self) -> Option<&str> {
        self.reported_error.as_deref()
    }
}

impl Serialize for ExtractedSections {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, text) in &self.entries {
            map.serialize_entry(name, text)?;
        }
        map.end()
    }
}

/// A named block: text after `start`, up to `end` (or the next section's
/// start, or the end of output).
#[derive(Debug, Clone)]
pub struct SectionPattern {
    pub name: String,
    start: Regex,
    end: Option<Regex>,
}

impl SectionPattern {
    pub fn new(name: impl Into<String>, start: &str, end: Option<&str>) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            start: Regex::new(start)?,
            end: end.map(Regex::new).transpose()?,
        })
    }

    /// `LABEL` followed by a rule of `-` or `=`, closed by another rule at
    /// the start of a line.
    pub fn ruled(name: impl Into<String>, label: &str) -> Self {
        let start = format!(r"{}[ \t]*\n[-=]{{3,}}[ \t]*\n", regex::escape(label));
        Self::new(name, &start, Some(r"(?m)^[-=]{3,}")).expect("escaped label forms a valid regex")
    }

    /// A header line containing `label`, optionally underlined with `=` or
    /// `-`; the section runs to the next section or end of output.
    pub fn header(name: impl Into<String>, label: &str) -> Self {
        let start = format!(r"{}[^\n]*\n(?:[=\-]{{3,}}[ \t]*\n)?", regex::escape(label));
        Self::new(name, &start, None).expect("escaped label forms a valid regex")
    }

    /// Everything after a line starting with `marker`.
    pub fn after_line_marker(name: impl Into<String>, marker: &str) -> Self {
        let start = format!(r"(?m)^{}[ \t]*", regex::escape(marker));
        Self::new(name, &start, None).expect("escaped marker forms a valid regex")
    }
}

/// Turns a parsed JSON document into sections, or into the error message
/// the document carries.
pub type JsonRender = fn(&serde_json::Value) -> Result<ExtractedSections, String>;

/// A JSON object embedded in stdout. Capture group 1 of `locate` is the
/// JSON text.
#[derive(Debug, Clone)]
pub struct JsonDocument {
    locate: Regex,
    render: JsonRender,
    required: bool,
}

impl JsonDocument {
    /// The JSON between two marker lines.
    pub fn between(start: &str, end: &str, render: JsonRender) -> Self {
        let locate = format!(r"(?s){}\s*(.*?)\s*{}", regex::escape(start), regex::escape(end));
        Self {
            locate: Regex::new(&locate).expect("escaped markers form a valid regex"),
            render,
            required: false,
        }
    }

    /// From the first `{` to the last `}` of the output.
    pub fn outermost_object(render: JsonRender) -> Self {
        Self {
            locate: Regex::new(r"(?s)(\{.*\})").expect("valid regex"),
            render,
            required: false,
        }
    }

    /// Output without a parseable document is an error instead of text.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn parse(&self, text: &str) -> Option<Result<ExtractedSections, String>> {
        let caps = self.locate.captures(text)?;
        match serde_json::from_str::<serde_json::Value>(&caps[1]) {
            Ok(value) => Some((self.render)(&value)),
            Err(e) => {
                tracing::debug!(error = %e, "embedded JSON did not parse, using text sections");
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SectionExtractor {
    json: Option<JsonDocument>,
    patterns: Vec<SectionPattern>,
    fallback: String,
    cues: Option<Regex>,
    noise: Vec<Regex>,
    date_stamp: bool,
}

impl SectionExtractor {
    pub fn new(patterns: Vec<SectionPattern>) -> Self {
        Self {
            json: None,
            patterns,
            fallback: "content".to_string(),
            cues: cue_regex(DEFAULT_CUES),
            noise: Vec::new(),
            date_stamp: false,
        }
    }

    /// Name given to the single section produced when no delimiter matched.
    pub fn fallback_section(mut self, name: impl Into<String>) -> Self {
        self.fallback = name.into();
        self
    }

    pub fn cues(mut self, cues: &[&str]) -> Self {
        self.cues = cue_regex(cues);
        self
    }

    /// Whole-line patterns removed from every section. Invalid patterns are
    /// logged and ignored.
    pub fn noise_lines(mut self, patterns: &[&str]) -> Self {
        for pattern in patterns {
            match Regex::new(&format!("(?m){pattern}")) {
                Ok(re) => self.noise.push(re),
                Err(e) => tracing::warn!(pattern, error = %e, "ignoring invalid noise pattern"),
            }
        }
        self
    }

    /// Prefer a JSON document when one is present and parses.
    pub fn json_document(mut self, doc: JsonDocument) -> Self {
        self.json = Some(doc);
        self
    }

    /// Prefix each section with the current local date/time unless it
    /// already starts with a date.
    pub fn date_stamped(mut self) -> Self {
        self.date_stamp = true;
        self
    }

    pub fn extract(&self, stdout: &str) -> ExtractedSections {
        self.extract_at(stdout, Local::now())
    }

    pub fn extract_at(&self, stdout: &str, now: DateTime<Local>) -> ExtractedSections {
        let text = normalize(stdout);

        if let Some(doc) = &self.json {
            match doc.parse(&text) {
                Some(Ok(raw)) => {
                    let mut sections = ExtractedSections::new();
                    for (name, body) in raw.iter() {
                        sections.insert(name, self.finish(body, now));
                    }
                    return sections;
                }
                Some(Err(message)) => return ExtractedSections::reported_error(message),
                None if doc.required => {
                    return ExtractedSections::reported_error("Failed to parse worker output as JSON");
                }
                None => {}
            }
        }

        let mut sections = ExtractedSections::new();

        for pattern in &self.patterns {
            let Some(m) = pattern.start.find(&text) else {
                continue;
            };
            let rest = &text[m.end()..];
            let end_delim = pattern.end.as_ref().and_then(|re| re.find(rest)).map(|e| e.start());
            let next_start = self.next_start(rest);
            let end = match (end_delim, next_start) {
                (Some(a), Some(b)) => a.min(b),
                (a, b) => a.or(b).unwrap_or(rest.len()),
            };
            sections.insert(pattern.name.clone(), self.finish(&rest[..end], now));
        }

        if self.patterns.iter().all(|p| !p.start.is_match(&text)) {
            let body = match self.cues.as_ref().and_then(|re| re.find(&text)) {
                Some(cue) => {
                    tracing::debug!(cue = cue.as_str().trim(), "no section delimiters, using cue");
                    &text[cue.start()..]
                }
                None => text.as_str(),
            };
            sections.insert(self.fallback.clone(), self.finish(body, now));
        }

        sections
    }

    fn next_start(&self, rest: &str) -> Option<usize> {
        self.patterns
            .iter()
            .filter_map(|p| p.start.find(rest))
            .map(|m| m.start())
            .filter(|&at| at > 0)
            .min()
    }

    fn finish(&self, raw: &str, now: DateTime<Local>) -> String {
        let mut text = raw.to_string();
        for re in &self.noise {
            text = re.replace_all(&text, "").into_owned();
        }
        let text = collapse_blank_lines(&text);
        if self.date_stamp && !text.is_empty() {
            prepend_date(&text, now)
        } else {
            text
        }
    }
}

fn cue_regex(cues: &[&str]) -> Option<Regex> {
    if cues.is_empty() {
        return None;
    }
    let alternatives = cues.iter().map(|c| regex::escape(c)).collect::<Vec<_>>().join("|");
    Regex::new(&format!(r"(?m)^[ \t]*(?:{alternatives})")).ok()
}

/// Strip terminal escape sequences and normalize line endings.
pub fn normalize(raw: &str) -> String {
    let stripped = ANSI.replace_all(raw, "");
    stripped.replace("\r\n", "\n").replace('\r', "\n")
}

/// Drop trailing blanks, squeeze 3+ newlines to 2, trim.
pub fn collapse_blank_lines(text: &str) -> String {
    let text = TRAILING_BLANKS.replace_all(text, "");
    BLANK_RUNS.replace_all(&text, "\n\n").trim().to_string()
}

pub fn starts_with_date(text: &str) -> bool {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|first| LEADING_DATE.is_match(first))
        .unwrap_or(false)
}

/// `October 18, 2026, 3:04 PM` above the text, unless it already has one.
pub fn prepend_date(text: &str, now: DateTime<Local>) -> String {
    if starts_with_date(text) {
        return text.to_string();
    }
    format!("{}\n\n{}", now.format("%B %-d, %Y, %-I:%M %p"), text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn case_study() -> SectionExtractor {
        SectionExtractor::new(vec![
            SectionPattern::ruled("outline", "OUTLINE:"),
            SectionPattern::ruled("case_study", "CASE STUDY:"),
        ])
        .fallback_section("case_study")
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 18, 15, 4, 0).unwrap()
    }

    #[test]
    fn ruled_sections_round_trip() {
        let out = "OUTLINE:\n--------\nA\n--------\nCASE STUDY:\n--------\nB\n--------";
        let sections = case_study().extract(out);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections.get("outline"), Some("A"));
        assert_eq!(sections.get("case_study"), Some("B"));
        let names: Vec<_> = sections.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["outline", "case_study"]);
    }

    #[test]
    fn eighty_dash_rules_and_progress_noise() {
        let rule = "-".repeat(80);
        let out = format!(
            "Researching...\nOUTLINE:\n{rule}\n1. Intro\n2. Results\n{rule}\n\nCASE STUDY:\n{rule}\nAcme cut costs.\n\n\n\nThe end.\n{rule}\nDone\n"
        );
        let sections = case_study().extract(&out);
        assert_eq!(sections.get("outline"), Some("1. Intro\n2. Results"));
        assert_eq!(sections.get("case_study"), Some("Acme cut costs.\n\nThe end."));
    }

    #[test]
    fn unterminated_section_stops_at_next_start() {
        let out = "OUTLINE:\n-----\nA\nB\nCASE STUDY:\n-----\nC";
        let sections = case_study().extract(out);
        assert_eq!(sections.get("outline"), Some("A\nB"));
        assert_eq!(sections.get("case_study"), Some("C"));
    }

    #[test]
    fn empty_ruled_section_is_omitted() {
        let out = "OUTLINE:\n--------\n--------\nCASE STUDY:\n--------\nB\n--------";
        let sections = case_study().extract(out);
        assert_eq!(sections.get("outline"), None);
        assert_eq!(sections.get("case_study"), Some("B"));
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn equals_rules_with_blank_padding() {
        let rule = "=".repeat(80);
        let extractor = SectionExtractor::new(vec![
            SectionPattern::ruled("summary", "JOB DESCRIPTION SUMMARY"),
            SectionPattern::ruled("cold_email", "COLD EMAIL"),
        ]);
        let out = format!(
            "JOB DESCRIPTION SUMMARY\n{rule}\n\nRust role.\n{rule}\n\nCOLD EMAIL\n{rule}\n\nHi Ana,\n{rule}\n"
        );
        let sections = extractor.extract(&out);
        assert_eq!(sections.get("summary"), Some("Rust role."));
        assert_eq!(sections.get("cold_email"), Some("Hi Ana,"));
    }

    fn render_summary(value: &serde_json::Value) -> Result<ExtractedSections, String> {
        if let Some(err) = value.get("error").and_then(|e| e.as_str()) {
            return Err(err.to_string());
        }
        let mut sections = ExtractedSections::new();
        if let Some(text) = value.get("summary").and_then(|s| s.as_str()) {
            sections.insert("summary", text);
        }
        Ok(sections)
    }

    #[test]
    fn json_document_between_markers_wins() {
        let extractor = SectionExtractor::new(vec![])
            .fallback_section("summary")
            .cues(&[])
            .json_document(JsonDocument::between("RESULT_JSON_START", "RESULT_JSON_END", render_summary));

        let ok = extractor.extract("Generating...\nRESULT_JSON_START\n{\"summary\": \"Notes\\n\\n\\n\\nEnd\"}\nRESULT_JSON_END\n");
        assert_eq!(ok.get("summary"), Some("Notes\n\nEnd"));
        assert_eq!(ok.worker_error(), None);

        let failed = extractor.extract("RESULT_JSON_START\n{\"error\": \"No transcript\"}\nRESULT_JSON_END");
        assert!(failed.is_empty());
        assert_eq!(failed.worker_error(), Some("No transcript"));

        let broken = extractor.extract("RESULT_JSON_START\n{not json\nRESULT_JSON_END\nplain notes");
        assert_eq!(broken.worker_error(), None);
        assert!(broken.get("summary").unwrap().contains("plain notes"));
    }

    #[test]
    fn absent_sections_are_omitted() {
        let sections = case_study().extract("CASE STUDY:\n----\nOnly this\n----");
        assert_eq!(sections.get("outline"), None);
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn no_delimiters_without_cue_keeps_whole_text() {
        let sections = case_study().extract("  just some raw output\n");
        assert_eq!(sections.get("case_study"), Some("just some raw output"));
    }

    #[test]
    fn no_delimiters_with_cue_starts_at_cue() {
        let extractor = SectionExtractor::new(vec![SectionPattern::header("email", "GENERATED EMAIL")])
            .fallback_section("email");
        let out = "Loading model...\nWarming up\nSubject: Q3 update\n\nDear team,\nNumbers are in.\n";
        let sections = extractor.extract(out);
        assert_eq!(
            sections.get("email"),
            Some("Subject: Q3 update\n\nDear team,\nNumbers are in.")
        );
    }

    #[test]
    fn header_section_with_underline() {
        let extractor = SectionExtractor::new(vec![SectionPattern::header("email", "GENERATED EMAIL")]);
        let out = "progress\n==== GENERATED EMAIL ====\n==========\nHi Sam,\r\n\r\nThanks!\r\n";
        assert_eq!(extractor.extract(out).get("email"), Some("Hi Sam,\n\nThanks!"));
    }

    #[test]
    fn strips_ansi_and_noise_lines() {
        let extractor = SectionExtractor::new(vec![])
            .fallback_section("answer")
            .cues(&[])
            .noise_lines(&[r"^Debug: .*$", r"^.*pydantic.*$"]);
        let out = "\x1b[32mGreen\x1b[0m text\nDebug: internal\nuses pydantic v1\n\n\n\nLast line";
        assert_eq!(
            extractor.extract(out).get("answer"),
            Some("Green text\n\nLast line")
        );
    }

    #[test]
    fn date_is_prepended_once() {
        let extractor = SectionExtractor::new(vec![SectionPattern::header("email", "GENERATED EMAIL")])
            .date_stamped();
        let sections = extractor.extract_at("GENERATED EMAIL\nDear Ana,\nHello.", fixed_now());
        assert_eq!(
            sections.get("email"),
            Some("October 18, 2026, 3:04 PM\n\nDear Ana,\nHello.")
        );

        let dated = extractor.extract_at("GENERATED EMAIL\nOctober 1, 2026\n\nDear Ana,", fixed_now());
        assert_eq!(dated.get("email"), Some("October 1, 2026\n\nDear Ana,"));
    }

    #[test]
    fn recognizes_common_date_lines() {
        assert!(starts_with_date("2026-10-18\nbody"));
        assert!(starts_with_date("Sunday, October 18, 2026"));
        assert!(starts_with_date("18 Oct 2026"));
        assert!(starts_with_date("Date: tomorrow"));
        assert!(!starts_with_date("Dear Ana,"));
        assert!(!starts_with_date("Mayor's office"));
    }

    #[test]
    fn sections_serialize_as_ordered_map() {
        let mut sections = ExtractedSections::new();
        sections.insert("outline", "A");
        sections.insert("case_study", "B");
        sections.insert("empty", "");
        assert_eq!(
            serde_json::to_string(&sections).unwrap(),
            r#"{"outline":"A","case_study":"B"}"#
        );
    }
}
