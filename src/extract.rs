//! LaTeX extraction from free-form model output.
//!
//! Model replies come in many shapes: bare LaTeX, `LaTeX: ...` labels,
//! conversational preambles, inline or display math delimiters. Extraction
//! runs in a fixed order:
//!
//! 1. strip a leading `LaTeX:` label (case-insensitive);
//! 2. strip a leading preamble such as `Here is the result:`;
//! 3. try each [`ExtractionTier`] in priority order and take the first match;
//! 4. otherwise return the cleaned text as bare LaTeX.
//!
//! The default tiers are display math (`$$...$$`) followed by inline math
//! (`$...$`). A display block wins even when an inline block appears earlier.
//! Matching stops at the first closing delimiter, so a literal `$` inside a
//! formula truncates it.

use once_cell::sync::Lazy;
use regex::Regex;

static LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^latex:").expect("static regex"));
static PREAMBLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(here is|the|this is).*?:\s*").expect("static regex"));
static DISPLAY_MATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$\$(.*?)\$\$").expect("static regex"));
static INLINE_MATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\$(.*?)\$").expect("static regex"));

/// Name reported when no tier matched and the cleaned text was returned as-is.
pub const BARE_TEXT_TIER: &str = "bare_text";

/// A matcher/extractor pair evaluated by [`LatexExtractor`].
pub trait ExtractionTier: Send + Sync {
    /// Short name used in logs and [`Extraction::tier`].
    fn name(&self) -> &str;

    /// Returns the extracted payload when this tier matches `text`.
    fn extract<'t>(&self, text: &'t str) -> Option<&'t str>;
}

/// A tier that returns the first capture group of a regex.
#[derive(Debug, Clone)]
pub struct RegexTier {
    name: String,
    regex: Regex,
}

impl RegexTier {
    /// Compiles `pattern`, which must contain one capture group.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        if regex.captures_len() < 2 {
            return Err(regex::Error::Syntax(format!(
                "extraction pattern '{pattern}' needs a capture group"
            )));
        }
        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    /// `$$...$$`, spanning newlines.
    pub fn display_math() -> Self {
        Self {
            name: "display_math".to_string(),
            regex: DISPLAY_MATH_RE.clone(),
        }
    }

    /// `$...$`, spanning newlines.
    pub fn inline_math() -> Self {
        Self {
            name: "inline_math".to_string(),
            regex: INLINE_MATH_RE.clone(),
        }
    }
}

impl ExtractionTier for RegexTier {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Result of one extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Extracted LaTeX, trimmed. May be empty.
    pub latex: String,
    /// Name of the tier that matched, or [`BARE_TEXT_TIER`].
    pub tier: String,
}

/// Pulls a LaTeX payload out of raw model output.
pub struct LatexExtractor {
    tiers: Vec<Box<dyn ExtractionTier>>,
}

impl Default for LatexExtractor {
    fn default() -> Self {
        Self {
            tiers: vec![
                Box::new(RegexTier::display_math()),
                Box::new(RegexTier::inline_math()),
            ],
        }
    }
}

impl std::fmt::Debug for LatexExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatexExtractor")
            .field("tiers", &self.tier_names())
            .finish()
    }
}

impl LatexExtractor {
    /// An extractor without delimiter tiers; only prefix stripping and the
    /// bare-text fallback apply.
    pub fn without_tiers() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Appends a tier with the lowest priority so far.
    pub fn with_tier(mut self, tier: impl ExtractionTier + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    /// Names of the delimiter tiers in priority order.
    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Extracts LaTeX from `raw`. The result may be empty.
    pub fn extract(&self, raw: &str) -> String {
        self.extract_with_tier(raw).latex
    }

    /// Like [`extract`](Self::extract), also reporting which tier matched.
    ///
    /// The label and preamble are only recognized at offset 0 of `raw`;
    /// whitespace is trimmed from the payload, not from the input.
    pub fn extract_with_tier(&self, raw: &str) -> Extraction {
        let cleaned = strip_preamble(strip_label(raw));

        for tier in &self.tiers {
            if let Some(payload) = tier.extract(cleaned) {
                return Extraction {
                    latex: payload.trim().to_string(),
                    tier: tier.name().to_string(),
                };
            }
        }

        Extraction {
            latex: cleaned.trim().to_string(),
            tier: BARE_TEXT_TIER.to_string(),
        }
    }
}

/// Removes a `LaTeX:` label (any case) at the very start of `text`, along
/// with the whitespace after it.
pub fn strip_label(text: &str) -> &str {
    match LABEL_RE.find(text) {
        Some(m) => text[m.end()..].trim_start(),
        None => text,
    }
}

/// Removes a leading `Here is ...:` / `The ...:` / `This is ...:` preamble,
/// up to and including the first colon.
pub fn strip_preamble(text: &str) -> &str {
    match PREAMBLE_RE.find(text) {
        Some(m) => &text[m.end()..],
        None => text,
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    // Bodies never contain `$` or `:`, so no delimiter, label or preamble
    // can appear by accident.
    const BODY: &str = r"[a-z0-9 +^_{}=\\]{0,12}";
    const NON_EMPTY_BODY: &str = r"[a-z0-9+^_{}=\\][a-z0-9 +^_{}=\\]{0,11}";
    const FILLER: &str = "[a-z ]{1,8}";

    proptest! {
        #[test]
        fn test_display_beats_inline_in_any_order(
            display in BODY,
            inline in NON_EMPTY_BODY,
            lead in FILLER,
            mid in FILLER,
            tail in FILLER,
            display_first in any::<bool>(),
        ) {
            let raw = if display_first {
                format!("{lead}$${display}$${mid}${inline}${tail}")
            } else {
                format!("{lead}${inline}${mid}$${display}$${tail}")
            };
            let extraction = LatexExtractor::default().extract_with_tier(&raw);
            prop_assert_eq!(extraction.latex, display.trim());
            prop_assert_eq!(extraction.tier, "display_math");
        }

        #[test]
        fn test_inline_only_is_trimmed(
            inline in NON_EMPTY_BODY,
            lead in FILLER,
            tail in FILLER,
        ) {
            let raw = format!("{lead}${inline}${tail}");
            prop_assert_eq!(LatexExtractor::default().extract(&raw), inline.trim());
        }

        #[test]
        fn test_dollar_free_text_is_returned_trimmed(
            text in r"[a-z0-9 \t\n+^_{}=\\]{0,40}",
        ) {
            let extraction = LatexExtractor::default().extract_with_tier(&text);
            prop_assert_eq!(extraction.latex, text.trim());
            prop_assert_eq!(extraction.tier, BARE_TEXT_TIER);
        }

        #[test]
        fn test_label_is_stripped_before_bare_text(text in r"[a-z0-9 +^_{}=\\]{0,24}") {
            let raw = format!("LaTeX: {text}");
            prop_assert_eq!(LatexExtractor::default().extract(&raw), text.trim());
        }
    }
}
