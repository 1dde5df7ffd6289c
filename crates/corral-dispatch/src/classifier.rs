use corral_core::types::RoutingRule;
use tracing::debug;

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Strategy seam for task classification.
///
/// The dispatcher only depends on this trait, so the matching algorithm can
/// be swapped (keyword table now, embeddings later) without touching any
/// dispatch logic.
pub trait Classifier: Send + Sync {
    /// Returns the routing category for `text`, or `None` when nothing
    /// matches and the wildcard default applies.
    fn classify(&self, text: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// KeywordClassifier
// ---------------------------------------------------------------------------

struct CategoryPattern {
    category: String,
    keywords: Vec<String>,
    weight: i32,
}

/// Keyword-table classifier built from the routing rules.
///
/// A rule matches when at least one of its keywords occurs in the text.
/// Among matching rules the highest weight wins; ties go to the rule
/// declared first. Occurrence counts are tallied only for the match log,
/// never for selection.
pub struct KeywordClassifier {
    patterns: Vec<CategoryPattern>,
}

impl KeywordClassifier {
    /// Build from routing rules, in declaration order. Wildcard rules carry
    /// no keywords and are skipped; they are the dispatcher's fallback, not
    /// a classification.
    pub fn from_rules(rules: &[RoutingRule]) -> Self {
        let patterns = rules
            .iter()
            .filter(|r| !r.is_wildcard())
            .map(|r| CategoryPattern {
                category: r.category.clone(),
                keywords: r.keywords.iter().map(|k| k.to_lowercase()).collect(),
                weight: r.weight,
            })
            .collect();
        Self { patterns }
    }

    /// Occurrences of `keyword` in the token stream (or, for multi-word
    /// keywords, in the raw lowercased text).
    fn hits(keyword: &str, tokens: &[String], lowered: &str) -> usize {
        if keyword.contains(' ') {
            lowered.matches(keyword).count()
        } else {
            tokens.iter().filter(|t| t.as_str() == keyword).count()
        }
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let tokens: Vec<String> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        let mut best: Option<(&CategoryPattern, usize)> = None;
        for pattern in &self.patterns {
            let hits: usize = pattern
                .keywords
                .iter()
                .map(|k| Self::hits(k, &tokens, &lowered))
                .sum();
            if hits == 0 {
                continue;
            }
            // Strictly-greater keeps the first-declared rule on equal weight.
            let better = match best {
                None => true,
                Some((b, _)) => pattern.weight > b.weight,
            };
            if better {
                best = Some((pattern, hits));
            }
        }

        best.map(|(pattern, hits)| {
            debug!(
                category = %pattern.category,
                weight = pattern.weight,
                hits,
                "task classified"
            );
            pattern.category.clone()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
