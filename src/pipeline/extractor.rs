//! Entity & intent extraction.
//!
//! Pure classification over the utterance text. Intent comes from weighted
//! cue phrases; entities are MAT standard codes plus a fixed lexicon of
//! organisations, locations and clinical concepts. A coreference phrase such
//! as "that standard" resolves to the codes of the most recent turn that
//! mentioned any. History is read, never written.

use std::sync::LazyLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;

use crate::config::ExtractorConfig;
use crate::error::PipelineError;
use crate::model::{EntityType, ExtractedEntity, ExtractedIntent, IntentCategory, Span, Turn};

/// Valid MAT standard numbers.
const MAT_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

const CONF_EXPLICIT_CODE: f32 = 0.95;
const CONF_LISTED_CODE: f32 = 0.9;
const CONF_BARE_STANDARD: f32 = 0.8;
const CONF_COREFERENCE: f32 = 0.75;
/// Numbers outside 1..=10 still surface, below any sane threshold.
const CONF_OUT_OF_RANGE: f32 = 0.3;

/// Added to the denominator so a single weak cue cannot reach full confidence.
const INTENT_PRIOR: f32 = 0.5;

/// `(phrase, weight)` per intent. Phrases match whole words and may overlap.
const INTENT_CUES: &[(IntentCategory, &[(&str, f32)])] = &[
    (
        IntentCategory::DefinitionLookup,
        &[
            ("what is", 1.0),
            ("what are", 1.0),
            ("what does", 1.0),
            ("define", 1.5),
            ("definition", 1.5),
            ("meaning", 1.0),
            ("mean", 1.0),
            ("require", 1.0),
            ("requires", 1.0),
            ("requirement", 1.0),
            ("describe", 1.0),
            ("explain", 1.0),
            ("tell me about", 1.0),
        ],
    ),
    (
        IntentCategory::ImplementationGuidance,
        &[
            ("how", 1.0),
            ("how do", 0.5),
            ("how can", 0.5),
            ("how should", 0.5),
            ("implement", 1.5),
            ("implementing", 1.5),
            ("implementation", 1.5),
            ("deliver", 1.0),
            ("put in place", 1.5),
            ("steps", 1.0),
            ("achieve", 1.0),
            ("guidance", 1.0),
            ("practice", 0.5),
            ("apply", 1.0),
            ("comply", 1.0),
            ("measure", 1.0),
        ],
    ),
    (
        IntentCategory::Comparison,
        &[
            ("compare", 2.0),
            ("comparison", 2.0),
            ("difference", 2.0),
            ("differences", 2.0),
            ("differ", 2.0),
            ("versus", 2.0),
            ("vs", 2.0),
            ("between", 1.0),
            ("contrast", 2.0),
        ],
    ),
];

/// `(phrase, canonical id, type, confidence)`. Phrases match whole words.
const LEXICON: &[(&str, &str, EntityType, f32)] = &[
    ("public health scotland", "org:phs", EntityType::Organization, 0.9),
    ("phs", "org:phs", EntityType::Organization, 0.7),
    ("nhs", "org:nhs", EntityType::Organization, 0.8),
    ("scottish government", "org:scottish-government", EntityType::Organization, 0.9),
    ("health board", "org:health-board", EntityType::Organization, 0.85),
    ("health boards", "org:health-board", EntityType::Organization, 0.85),
    ("alcohol and drug partnership", "org:adp", EntityType::Organization, 0.9),
    ("alcohol and drug partnerships", "org:adp", EntityType::Organization, 0.9),
    ("adp", "org:adp", EntityType::Organization, 0.75),
    ("adps", "org:adp", EntityType::Organization, 0.75),
    ("scotland", "loc:scotland", EntityType::Location, 0.7),
    ("uk", "loc:uk", EntityType::Location, 0.65),
    ("united kingdom", "loc:uk", EntityType::Location, 0.85),
    ("medication assisted treatment", "concept:mat", EntityType::Concept, 0.9),
    ("harm reduction", "concept:harm-reduction", EntityType::Concept, 0.85),
    ("recovery", "concept:recovery", EntityType::Concept, 0.65),
    ("substance use", "concept:substance-use", EntityType::Concept, 0.8),
    ("opioid substitution therapy", "concept:ost", EntityType::Concept, 0.9),
    ("ost", "concept:ost", EntityType::Concept, 0.7),
    ("naloxone", "concept:naloxone", EntityType::Concept, 0.85),
    ("trauma informed care", "concept:trauma-informed-care", EntityType::Concept, 0.9),
    ("trauma informed", "concept:trauma-informed-care", EntityType::Concept, 0.8),
    ("same day access", "concept:same-day-access", EntityType::Concept, 0.9),
    ("psychological support", "concept:psychological-support", EntityType::Concept, 0.85),
    ("independent advocacy", "concept:independent-advocacy", EntityType::Concept, 0.85),
    // Bare "MAT" as the treatment concept; dropped where it starts a code.
    ("mat", "concept:mat", EntityType::Concept, 0.7),
];

/// Phrases that refer back to a previously mentioned standard.
const COREFERENCE: &[&str] = &[
    "that standard",
    "this standard",
    "the same standard",
    "those standards",
    "these standards",
    "that one",
];

/// `MAT5`, `MAT 05`, `MAT Standard 5`, `Standard 5`. The `mat` group marks an
/// explicit code.
static CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(?P<mat>mat)\s*(?:standards?\s+)?|standards?\s+)(?P<num>\d{1,3})\b")
        .expect("MAT code pattern is valid")
});

/// Continuation of a code list right after a match: `, 4`, ` and 5`, ` or 6`.
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\s,]*(?:(?:and|or|&)[\s,]+)?(?P<num>\d{1,3})\b")
        .expect("code list pattern is valid")
});

#[derive(Debug, Clone, Copy)]
enum Phrase {
    Term { id: &'static str, kind: EntityType, confidence: f32 },
    Coreference,
}

/// Lexicon and coreference phrases in one leftmost-longest automaton.
struct PhraseIndex {
    automaton: AhoCorasick,
    phrases: Vec<Phrase>,
}

static PHRASES: LazyLock<PhraseIndex> = LazyLock::new(|| {
    let mut patterns: Vec<&str> = Vec::with_capacity(LEXICON.len() + COREFERENCE.len());
    let mut phrases = Vec::with_capacity(patterns.capacity());
    for &(phrase, id, kind, confidence) in LEXICON {
        patterns.push(phrase);
        phrases.push(Phrase::Term { id, kind, confidence });
    }
    for &phrase in COREFERENCE {
        patterns.push(phrase);
        phrases.push(Phrase::Coreference);
    }
    let automaton = AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .ascii_case_insensitive(true)
        .build(&patterns)
        .expect("lexicon automaton builds");
    PhraseIndex { automaton, phrases }
});

/// Every cue phrase; overlapping matches all count, so `how should` also
/// scores `how`.
static CUES: LazyLock<(AhoCorasick, Vec<(IntentCategory, f32)>)> = LazyLock::new(|| {
    let mut patterns: Vec<&str> = Vec::new();
    let mut weights = Vec::new();
    for &(category, cues) in INTENT_CUES {
        for &(phrase, weight) in cues {
            patterns.push(phrase);
            weights.push((category, weight));
        }
    }
    let automaton = AhoCorasickBuilder::new()
        .match_kind(MatchKind::Standard)
        .ascii_case_insensitive(true)
        .build(&patterns)
        .expect("intent cue automaton builds");
    (automaton, weights)
});

/// Punctuation becomes spaces of the same byte width, so spans found in the
/// result are valid in `text` and `trauma-informed` matches `trauma informed`.
fn normalise(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let width = if c.is_alphanumeric() { 0 } else { c.len_utf8() };
            std::iter::repeat_n(' ', width).chain((width == 0).then_some(c))
        })
        .collect()
}

/// Match sits on word boundaries in `text`.
fn whole_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back().is_none_or(|c| !c.is_alphanumeric());
    let after = text[end..].chars().next().is_none_or(|c| !c.is_alphanumeric());
    before && after
}

/// Canonical node id for a standard number.
pub fn mat_code(n: u32) -> String {
    format!("MAT{n:02}")
}

#[derive(Debug, Clone)]
pub struct EntityIntentExtractor {
    intent_threshold: f32,
    entity_threshold: f32,
}

impl EntityIntentExtractor {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            intent_threshold: config.intent_threshold,
            entity_threshold: config.entity_threshold,
        }
    }

    /// Classify intent and extract entities.
    ///
    /// Entities are deduplicated by canonical id (highest confidence wins) and
    /// returned in order of first mention.
    pub fn extract(
        &self,
        text: &str,
        history: &[Turn],
    ) -> Result<(ExtractedIntent, Vec<ExtractedEntity>), PipelineError> {
        for (name, t) in [("intent", self.intent_threshold), ("entity", self.entity_threshold)] {
            if !(0.0..=1.0).contains(&t) {
                return Err(PipelineError::Extraction(format!(
                    "{name} threshold {t} outside [0, 1]"
                )));
            }
        }

        let normalised = normalise(text);
        let intent = self.classify(&normalised);

        let codes = mat_codes(text);
        let (terms, coreference_span) = phrases(text, &normalised);
        let has_code = codes
            .iter()
            .any(|e| e.entity_type == EntityType::MatStandard && e.confidence >= self.entity_threshold);

        let mut found: Vec<ExtractedEntity> = terms
            .into_iter()
            .filter(|t| !codes.iter().any(|c| overlaps(&c.span, &t.span)))
            .collect();
        found.extend(codes);
        if !has_code {
            if let Some(span) = coreference_span {
                found.extend(coreference(text, span, history));
            }
        }

        let accepted: Vec<ExtractedEntity> =
            found.into_iter().filter(|e| e.confidence >= self.entity_threshold).collect();

        let mut entities: Vec<ExtractedEntity> = Vec::new();
        for e in accepted.iter().filter(|e| !inside_longer_mention(e, &accepted)) {
            match entities.iter_mut().find(|x| x.canonical_id == e.canonical_id) {
                Some(existing) if e.confidence > existing.confidence => *existing = e.clone(),
                Some(_) => {}
                None => entities.push(e.clone()),
            }
        }
        entities.sort_by_key(|e| e.span.start);

        Ok((intent, entities))
    }

    fn classify(&self, normalised: &str) -> ExtractedIntent {
        let (automaton, weights) = &*CUES;
        let mut scores: Vec<(IntentCategory, f32)> =
            INTENT_CUES.iter().map(|(category, _)| (*category, 0.0)).collect();
        for m in automaton.find_overlapping_iter(normalised) {
            if !whole_word(normalised, m.start(), m.end()) {
                continue;
            }
            let (category, weight) = weights[m.pattern().as_usize()];
            if let Some(slot) = scores.iter_mut().find(|(c, _)| *c == category) {
                slot.1 += weight;
            }
        }
        // Stable: on equal scores the earlier category in the table wins.
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (top, top_score) = scores[0];
        let runner_up = scores.get(1).map(|s| s.1).unwrap_or(0.0);
        let confidence = if top_score > 0.0 {
            top_score / (top_score + runner_up + INTENT_PRIOR)
        } else {
            0.0
        };

        if confidence >= self.intent_threshold {
            ExtractedIntent { category: top, confidence }
        } else {
            ExtractedIntent::general(confidence)
        }
    }
}

fn overlaps(a: &Span, b: &Span) -> bool {
    a.start < b.end && b.start < a.end
}

/// "Scotland" inside "Public Health Scotland" is not a separate mention.
fn inside_longer_mention(e: &ExtractedEntity, all: &[ExtractedEntity]) -> bool {
    let len = e.span.end - e.span.start;
    all.iter().any(|o| {
        o.span.start <= e.span.start && e.span.end <= o.span.end && o.span.end - o.span.start > len
    })
}

fn entity(text: &str, start: usize, end: usize, id: String, kind: EntityType, confidence: f32) -> ExtractedEntity {
    ExtractedEntity {
        mention: text[start..end].to_string(),
        span: Span { start, end },
        canonical_id: id,
        entity_type: kind,
        confidence,
    }
}

/// Standard codes, including trailing lists such as `MAT 3 and 4`.
fn mat_codes(text: &str) -> Vec<ExtractedEntity> {
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(caps) = CODE.captures_at(text, pos) {
        let (Some(whole), Some(num)) = (caps.get(0), caps.name("num")) else {
            break;
        };
        let conf = if caps.name("mat").is_some() { CONF_EXPLICIT_CODE } else { CONF_BARE_STANDARD };
        out.push(code_entity(text, whole.start(), whole.end(), num.as_str(), conf));

        pos = whole.end();
        while let Some(item) = LIST_ITEM.captures(&text[pos..]) {
            let (Some(all), Some(num)) = (item.get(0), item.name("num")) else {
                break;
            };
            let (start, end) = (pos + num.start(), pos + num.end());
            out.push(code_entity(text, start, end, num.as_str(), CONF_LISTED_CODE.min(conf)));
            pos += all.end();
        }
    }
    out
}

fn code_entity(text: &str, start: usize, end: usize, digits: &str, conf: f32) -> ExtractedEntity {
    let n: u32 = digits.parse().unwrap_or(0);
    let confidence = if MAT_RANGE.contains(&n) { conf } else { CONF_OUT_OF_RANGE };
    entity(text, start, end, mat_code(n), EntityType::MatStandard, confidence)
}

/// Lexicon entities and the span of the first coreference phrase.
fn phrases(text: &str, normalised: &str) -> (Vec<ExtractedEntity>, Option<Span>) {
    let mut terms = Vec::new();
    let mut coreference = None;
    for m in PHRASES.automaton.find_iter(normalised) {
        let (start, end) = (m.start(), m.end());
        if !whole_word(normalised, start, end) {
            continue;
        }
        match PHRASES.phrases[m.pattern().as_usize()] {
            Phrase::Term { id, kind, confidence } => {
                terms.push(entity(text, start, end, id.to_string(), kind, confidence));
            }
            Phrase::Coreference if coreference.is_none() => coreference = Some(Span { start, end }),
            Phrase::Coreference => {}
        }
    }
    (terms, coreference)
}

/// Resolve "that standard" and friends to the codes of the latest turn that
/// mentioned any valid standard.
fn coreference(text: &str, span: Span, history: &[Turn]) -> Vec<ExtractedEntity> {
    for turn in history.iter().rev() {
        let codes: Vec<ExtractedEntity> = mat_codes(&turn.content)
            .into_iter()
            .filter(|e| e.confidence > CONF_OUT_OF_RANGE)
            .collect();
        if !codes.is_empty() {
            return codes
                .into_iter()
                .map(|c| entity(text, span.start, span.end, c.canonical_id, EntityType::MatStandard, CONF_COREFERENCE))
                .collect();
        }
    }
    Vec::new()
}
