use crate::derive::sites::Site;
use crate::snapshot::Alert;

/// Alerts with sentiment at or above this never penalize a site.
pub const NEGATIVE_SENTIMENT_THRESHOLD: f64 = -0.05;

/// Topics that show up in negative news but say nothing about logistics.
const IRRELEVANT_TOPICS: &[&str] = &[
    "football",
    "soccer",
    "nba",
    "nfl",
    "cricket",
    "recipe",
    "celebrity",
    "horoscope",
    "box office",
    "exam prep",
    "bitcoin",
    "crypto",
    "ethereum",
    "fashion week",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrength {
    Direct,
    Regional,
}

/// Decides whether an alert concerns a site, and how closely.
pub trait AlertMatcher: Send + Sync {
    fn classify(&self, alert: &Alert, site: &Site) -> Option<MatchStrength>;
}

/// Substring matching of negative alerts against each site's keyword sets.
///
/// Irrelevant topics match whole words only, so "nfl" does not exclude an
/// alert about inflation.
pub struct KeywordMatcher {
    irrelevant: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(irrelevant: Vec<String>) -> Self {
        Self {
            irrelevant: irrelevant
                .iter()
                .map(|kw| words(kw))
                .filter(|kw| !kw.is_empty())
                .collect(),
        }
    }

    fn is_irrelevant(&self, text: &str) -> bool {
        let padded = format!(" {} ", words(text));
        self.irrelevant
            .iter()
            .any(|kw| padded.contains(&format!(" {kw} ")))
    }
}

/// Lowercased alphanumeric words joined by single spaces.
fn words(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Default for KeywordMatcher {
    fn default() -> Self {
        Self::new(IRRELEVANT_TOPICS.iter().map(|s| s.to_string()).collect())
    }
}

impl AlertMatcher for KeywordMatcher {
    fn classify(&self, alert: &Alert, site: &Site) -> Option<MatchStrength> {
        if alert.sentiment >= NEGATIVE_SENTIMENT_THRESHOLD {
            return None;
        }
        let text = alert.search_text();
        if self.is_irrelevant(&text) {
            return None;
        }
        if site.direct.iter().any(|kw| text.contains(kw.as_str())) {
            Some(MatchStrength::Direct)
        } else if site.regional.iter().any(|kw| text.contains(kw.as_str())) {
            Some(MatchStrength::Regional)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Severity;
    use chrono::Utc;

    fn site() -> Site {
        Site::new("Rotterdam", 51.95, 4.14, &["rotterdam"], &["north sea", "netherlands"])
    }

    fn alert(title: &str, sentiment: f64) -> Alert {
        Alert {
            timestamp: Utc::now(),
            severity: Severity::High,
            title: title.to_string(),
            body: String::new(),
            category: "ports".into(),
            sentiment,
            source: None,
            url: None,
        }
    }

    #[test]
    fn test_direct_beats_regional() {
        let m = KeywordMatcher::default();
        let a = alert("Strike halts Rotterdam terminals across the Netherlands", -0.6);
        assert_eq!(m.classify(&a, &site()), Some(MatchStrength::Direct));
    }

    #[test]
    fn test_regional_match() {
        let m = KeywordMatcher::default();
        let a = alert("Storm closes North Sea shipping lanes", -0.4);
        assert_eq!(m.classify(&a, &site()), Some(MatchStrength::Regional));
    }

    #[test]
    fn test_non_negative_alert_ignored() {
        let m = KeywordMatcher::default();
        let a = alert("Rotterdam posts record throughput", 0.6);
        assert_eq!(m.classify(&a, &site()), None);
        let slightly = alert("Rotterdam volumes flat", -0.05);
        assert_eq!(m.classify(&slightly, &site()), None);
    }

    #[test]
    fn test_irrelevant_topic_excluded() {
        let m = KeywordMatcher::default();
        let a = alert("Rotterdam football club suffers crushing defeat", -0.9);
        assert_eq!(m.classify(&a, &site()), None);
    }

    #[test]
    fn test_irrelevant_topics_match_whole_words() {
        let m = KeywordMatcher::default();
        let a = alert("Rotterdam dock strike fuels inflation fears", -0.8);
        assert_eq!(m.classify(&a, &site()), Some(MatchStrength::Direct));
        let b = alert("Unbanked Rotterdam dockers walk out", -0.5);
        assert_eq!(m.classify(&b, &site()), Some(MatchStrength::Direct));
        let c = alert("Rotterdam NFL exhibition game cancelled", -0.5);
        assert_eq!(m.classify(&c, &site()), None);
    }

    #[test]
    fn test_irrelevant_phrase_needs_word_boundaries() {
        let m = KeywordMatcher::default();
        let a = alert("Rotterdam box office takings slump", -0.5);
        assert_eq!(m.classify(&a, &site()), None);
        let b = alert("Rotterdam box-office slump", -0.5);
        assert_eq!(m.classify(&b, &site()), None);
        let c = alert("Rotterdam sandbox officers strike", -0.5);
        assert_eq!(m.classify(&c, &site()), Some(MatchStrength::Direct));
    }

    #[test]
    fn test_custom_keywords_are_case_insensitive() {
        let m = KeywordMatcher::new(vec!["Bitcoin".into(), "  ".into()]);
        let a = alert("Rotterdam BITCOIN miners idle", -0.5);
        assert_eq!(m.classify(&a, &site()), None);
        let b = alert("Rotterdam cranes idle", -0.5);
        assert_eq!(m.classify(&b, &site()), Some(MatchStrength::Direct));
    }
}
