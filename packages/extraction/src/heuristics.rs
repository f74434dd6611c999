//! Rule-based extraction from raw FDS text.
//!
//! Zero network cost: everything here is regex scanning plus context checks.
//! Candidates are confidence-weighted by match quality: a prefixed
//! identifier (`UN 1090`) beats a bare number, which beats a table-inferred
//! value. A pure function over its input; no shared state.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::types::field::{names, Candidate};
use crate::un_table::lookup_un;

const UN_MIN: u32 = 4;
const UN_MAX: u32 = 3506;

/// Tokens that mark a 4-digit number as a standard/version reference.
const STANDARD_TOKENS: &[&str] = &[
    "NBR", "ABNT", "ISO", "DIN", "EN", "VERSAO", "VERSÃO", "REVISAO", "REVISÃO", "REV", "EDICAO",
    "EDIÇÃO",
];

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static RE: OnceLock<Regex> = OnceLock::new();
            RE.get_or_init(|| Regex::new($pattern).expect("pattern is valid"))
        }
    };
}

static_regex!(phone_re, r"(?:\+?\d{2}\s)?\(?\d{2,3}\)?[\s.]?\d{4,5}[-.]\d{4}\b");
static_regex!(un_prefixed_re, r"(?i)\b(?:UN|ONU)[\s#:;]{0,3}(\d{4})\b");
static_regex!(un_bare_re, r"\b(\d{4})\b");
static_regex!(cas_re, r"\b\d{2,7}-\d{2}-\d\b");
static_regex!(class_re, r"(?i)\bclasse\s*(?:de\s*risco)?\s*[:\-]?\s*(\d(?:\.\d)?)");
static_regex!(
    product_re,
    r"(?i)(?P<label>nome\s*(?:comercial|do\s+produto(?:\s+qu[ií]mico)?)|identifica(?:ç|c)[aã]o\s+do\s+produto|identificador\s+do\s+produto|produto)\s*[:\-]\s*(?P<value>.{3,120})"
);
static_regex!(strong_product_label_re, r"(?i)nome\s+do\s+produto|nome\s*comercial");
static_regex!(
    manufacturer_re,
    r"(?i)(?P<label>fabricante|fabricado\s+por|fornecedor(?:/distribuidor)?|empresa|raz[aã]o\s+social)\s*[:\-]\s*(?P<value>.{3,120})"
);
static_regex!(strong_manufacturer_label_re, r"(?i)fabricante|fabricado\s+por|fornecedor");
static_regex!(
    packing_group_re,
    r"(?i)grupo\s*(?:de)?\s*embalagem\s*[:\-]?\s*(III|II|I|[123])\b"
);
static_regex!(trailing_parenthetical_re, r"\s*\([^)]*\)\s*$");

/// Regex-driven fallback extractors for the default field set.
#[derive(Debug, Default)]
pub struct HeuristicExtractor;

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Scan the document and return one candidate per field found.
    ///
    /// When section boundaries are known, each field scans its preferred
    /// sections; otherwise the whole text (or its head, for Section 1
    /// fields) is used.
    pub fn extract(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> IndexMap<String, Candidate> {
        let mut candidates = IndexMap::new();

        if let Some(candidate) = self.extract_un_number(text, sections) {
            candidates.insert(names::NUMERO_ONU.to_string(), candidate);
        }
        if let Some(candidate) = self.extract_cas(text, sections) {
            candidates.insert(names::NUMERO_CAS.to_string(), candidate);
        }
        if let Some(candidate) = self.extract_hazard_class(text, sections) {
            candidates.insert(names::CLASSIFICACAO_ONU.to_string(), candidate);
        } else {
            let inferred = self.infer_class_from_table(candidates.get(names::NUMERO_ONU));
            if let Some(candidate) = inferred {
                candidates.insert(names::CLASSIFICACAO_ONU.to_string(), candidate);
            }
        }
        if let Some(candidate) = self.extract_product_name(text, sections) {
            candidates.insert(names::NOME_PRODUTO.to_string(), candidate);
        }
        if let Some(candidate) = self.extract_manufacturer(text, sections) {
            candidates.insert(names::FABRICANTE.to_string(), candidate);
        }
        if let Some(candidate) = self.extract_packing_group(text, sections) {
            candidates.insert(names::GRUPO_EMBALAGEM.to_string(), candidate);
        }

        candidates
    }

    fn extract_un_number(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        for block in search_blocks(text, sections) {
            let masked = mask_phone_numbers(block);
            if let Some(candidate) = scan_un_block(&masked) {
                tracing::debug!(value = %candidate.value, "heuristic UN number detected");
                return Some(candidate);
            }
        }
        None
    }

    fn extract_cas(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        for block in search_blocks(text, sections) {
            if let Some(m) = cas_re().find(block) {
                tracing::debug!(value = %m.as_str(), "heuristic CAS number detected");
                return Some(
                    Candidate::new(m.as_str(), 0.80)
                        .with_context(snippet(block, m.start(), m.end(), 60)),
                );
            }
        }
        None
    }

    fn extract_hazard_class(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        for block in search_blocks(text, sections) {
            if let Some(caps) = class_re().captures(block) {
                let m = caps.get(1).expect("class capture present");
                let whole = caps.get(0).expect("whole match present");
                return Some(
                    Candidate::new(m.as_str(), 0.78)
                        .with_context(snippet(block, whole.start(), whole.end(), 60)),
                );
            }
        }
        None
    }

    /// Table-inferred hazard class, at lower confidence than any textual hit.
    fn infer_class_from_table(&self, un_candidate: Option<&Candidate>) -> Option<Candidate> {
        let un = un_candidate.filter(|c| c.is_found())?;
        let entry = lookup_un(&un.value)?;
        let class = entry.hazard_class.as_deref().filter(|c| !c.is_empty())?;
        Some(Candidate::new(class, 0.60).with_context("Tabela ONU"))
    }

    fn extract_product_name(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        let block = identification_block(text, sections);
        let caps = product_re().captures(block)?;
        let label = caps.name("label").expect("label group present");
        let raw = caps.name("value").expect("value group present");
        let whole = caps.get(0).expect("whole match present");

        let mut value = raw.as_str().lines().next().unwrap_or_default().trim().to_string();
        value = trailing_parenthetical_re().replace(&value, "").trim().to_string();
        if value.is_empty() {
            return None;
        }

        let confidence = if strong_product_label_re().is_match(label.as_str()) {
            0.88
        } else {
            0.75
        };
        Some(
            Candidate::new(value, confidence)
                .with_context(snippet(block, whole.start(), whole.end(), 40)),
        )
    }

    fn extract_manufacturer(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        let block = identification_block(text, sections);
        let caps = manufacturer_re().captures(block)?;
        let label = caps.name("label").expect("label group present");
        let raw = caps.name("value").expect("value group present");
        let whole = caps.get(0).expect("whole match present");

        let value = raw.as_str().lines().next().unwrap_or_default().trim().to_string();
        if value.is_empty() {
            return None;
        }

        let confidence = if strong_manufacturer_label_re().is_match(label.as_str()) {
            0.80
        } else {
            0.72
        };
        Some(
            Candidate::new(value, confidence)
                .with_context(snippet(block, whole.start(), whole.end(), 40)),
        )
    }

    fn extract_packing_group(
        &self,
        text: &str,
        sections: Option<&BTreeMap<u8, String>>,
    ) -> Option<Candidate> {
        let blocks: Vec<&str> = match sections.and_then(|s| s.get(&14)) {
            Some(section) => vec![section.as_str()],
            None => search_blocks(text, sections),
        };
        for block in blocks {
            if let Some(caps) = packing_group_re().captures(block) {
                let m = caps.get(1).expect("group capture present");
                let whole = caps.get(0).expect("whole match present");
                let value = match m.as_str().to_uppercase().as_str() {
                    "1" => "I".to_string(),
                    "2" => "II".to_string(),
                    "3" => "III".to_string(),
                    roman => roman.to_string(),
                };
                return Some(
                    Candidate::new(value, 0.80)
                        .with_context(snippet(block, whole.start(), whole.end(), 50)),
                );
            }
        }
        None
    }
}

/// Ordered scan space: known sections, else the whole text.
fn search_blocks<'a>(text: &'a str, sections: Option<&'a BTreeMap<u8, String>>) -> Vec<&'a str> {
    match sections {
        Some(sections) if !sections.is_empty() => {
            sections.values().map(|s| s.as_str()).collect()
        }
        _ => vec![text],
    }
}

/// Section 1 when known, else the head of the document.
fn identification_block<'a>(text: &'a str, sections: Option<&'a BTreeMap<u8, String>>) -> &'a str {
    if let Some(section) = sections.and_then(|s| s.get(&1)) {
        return section.as_str();
    }
    let end = ceil_boundary(text, text.len().min(2000));
    &text[..end]
}

/// Blank out phone-like digit runs so they can never look like UN numbers.
///
/// Replacement preserves byte offsets (matches are pure ASCII).
fn mask_phone_numbers(text: &str) -> String {
    let mut masked = text.to_string();
    let ranges: Vec<_> = phone_re().find_iter(text).map(|m| m.range()).collect();
    for range in ranges {
        let spaces = " ".repeat(range.len());
        masked.replace_range(range, &spaces);
    }
    masked
}

fn scan_un_block(block: &str) -> Option<Candidate> {
    if let Some(caps) = un_prefixed_re().captures(block) {
        let digits = caps.get(1).expect("digit capture present");
        if let Some(number) = parse_in_range(digits.as_str()) {
            let whole = caps.get(0).expect("whole match present");
            return Some(
                Candidate::new(format!("{number:04}"), 0.95)
                    .with_context(snippet(block, whole.start(), whole.end(), 60)),
            );
        }
    }

    for caps in un_bare_re().captures_iter(block) {
        let m = caps.get(1).expect("digit capture present");
        let Some(number) = parse_in_range(m.as_str()) else {
            continue;
        };
        if is_calendar_year(number)
            || is_cas_fragment(block, m.start(), m.end())
            || is_date_fragment(block, m.start(), m.end())
            || follows_standard_token(block, m.start())
        {
            continue;
        }
        return Some(
            Candidate::new(m.as_str(), 0.85).with_context(snippet(block, m.start(), m.end(), 60)),
        );
    }

    None
}

fn parse_in_range(digits: &str) -> Option<u32> {
    let number: u32 = digits.parse().ok()?;
    (UN_MIN..=UN_MAX).contains(&number).then_some(number)
}

fn is_calendar_year(number: u32) -> bool {
    (1900..=2100).contains(&number)
}

/// Part of a CAS number: `7664` in `7664-41-7`, or the middle/last groups.
fn is_cas_fragment(block: &str, start: usize, end: usize) -> bool {
    let after = &block[end..];
    if after.starts_with('-') && after[1..].starts_with(|c: char| c.is_ascii_digit()) {
        return true;
    }
    let before = &block[..start];
    before.ends_with('-')
        && before[..before.len() - 1].ends_with(|c: char| c.is_ascii_digit())
}

/// Part of a slash-separated date such as `04/2019`.
fn is_date_fragment(block: &str, start: usize, end: usize) -> bool {
    block[..start].ends_with('/') || block[end..].starts_with('/')
}

/// Preceded by a standard/version token such as `NBR` or `versão`.
fn follows_standard_token(block: &str, start: usize) -> bool {
    let window_start = floor_boundary(block, start.saturating_sub(24));
    let window = block[window_start..start].trim_end();
    let Some(last) = window.split_whitespace().last() else {
        return false;
    };
    let token = last.trim_end_matches([':', '.', '-']).to_uppercase();
    STANDARD_TOKENS.contains(&token.as_str())
}

/// Trimmed context window around a byte range, snapped to char boundaries.
fn snippet(block: &str, start: usize, end: usize, pad: usize) -> String {
    let from = floor_boundary(block, start.saturating_sub(pad));
    let to = ceil_boundary(block, (end + pad).min(block.len()));
    block[from..to].trim().to_string()
}

fn floor_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> IndexMap<String, Candidate> {
        HeuristicExtractor::new().extract(text, None)
    }

    #[test]
    fn prefixed_un_number_scores_high() {
        let candidates = extract("Numero ONU: UN1090 para transporte rodoviario");
        let un = &candidates[names::NUMERO_ONU];
        assert_eq!(un.value, "1090");
        assert_eq!(un.confidence, 0.95);
        assert!(un.context.contains("UN1090"));
    }

    #[test]
    fn bare_un_number_scores_lower() {
        let candidates = extract("Transporte terrestre, produto 1203, inflamavel");
        let un = &candidates[names::NUMERO_ONU];
        assert_eq!(un.value, "1203");
        assert_eq!(un.confidence, 0.85);
    }

    #[test]
    fn un_number_out_of_range_is_skipped() {
        let candidates = extract("codigo 9999 sem significado");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
    }

    #[test]
    fn calendar_years_are_rejected() {
        let candidates = extract("Ficha revisada em 2019, produto sem transporte");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
    }

    #[test]
    fn prefixed_year_like_number_is_still_accepted() {
        // The UN/ONU prefix overrides the calendar-year guard.
        let candidates = extract("ONU: 2031 (acido nitrico)");
        assert_eq!(candidates[names::NUMERO_ONU].value, "2031");
    }

    #[test]
    fn standard_references_are_rejected() {
        let candidates = extract("Conforme ABNT NBR 1480 desta norma");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
    }

    #[test]
    fn cas_fragments_are_not_un_numbers() {
        let candidates = extract("CAS 7664-41-7 amonia");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
        assert_eq!(candidates[names::NUMERO_CAS].value, "7664-41-7");
    }

    #[test]
    fn phone_numbers_are_masked_before_scanning() {
        let candidates = extract("Emergencia: (11) 3433-1090 fale conosco");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
    }

    #[test]
    fn date_fragments_are_rejected() {
        let candidates = extract("Emitida em 04/2015 sem outras notas");
        assert!(!candidates.contains_key(names::NUMERO_ONU));
    }

    #[test]
    fn hazard_class_from_text() {
        let candidates = extract("Classe de risco: 6.1 toxico");
        let class = &candidates[names::CLASSIFICACAO_ONU];
        assert_eq!(class.value, "6.1");
        assert_eq!(class.confidence, 0.78);
    }

    #[test]
    fn hazard_class_inferred_from_table_when_absent() {
        let candidates = extract("Numero ONU: UN1090");
        let class = &candidates[names::CLASSIFICACAO_ONU];
        assert_eq!(class.value, "3");
        assert_eq!(class.confidence, 0.60);
        assert_eq!(class.context, "Tabela ONU");
    }

    #[test]
    fn product_name_with_strong_label() {
        let candidates = extract("Nome do produto: Acetona PA (pureza 99%)\nFabricante: Quimica XYZ Ltda");
        let name = &candidates[names::NOME_PRODUTO];
        assert_eq!(name.value, "Acetona PA");
        assert_eq!(name.confidence, 0.88);

        let manufacturer = &candidates[names::FABRICANTE];
        assert_eq!(manufacturer.value, "Quimica XYZ Ltda");
        assert_eq!(manufacturer.confidence, 0.80);
    }

    #[test]
    fn weak_product_label_scores_lower() {
        let candidates = extract("Produto: Solvente industrial");
        assert_eq!(candidates[names::NOME_PRODUTO].confidence, 0.75);
    }

    #[test]
    fn packing_group_is_normalized_to_roman() {
        let candidates = extract("Grupo de embalagem: 2");
        assert_eq!(candidates[names::GRUPO_EMBALAGEM].value, "II");

        let candidates = extract("Grupo embalagem: III");
        assert_eq!(candidates[names::GRUPO_EMBALAGEM].value, "III");
    }

    #[test]
    fn sections_narrow_the_search_space() {
        let mut sections = BTreeMap::new();
        sections.insert(1, "Nome do produto: Etanol".to_string());
        sections.insert(14, "Numero ONU: UN1170\nGrupo de embalagem: II".to_string());

        let candidates = HeuristicExtractor::new().extract("", Some(&sections));
        assert_eq!(candidates[names::NUMERO_ONU].value, "1170");
        assert_eq!(candidates[names::NOME_PRODUTO].value, "Etanol");
        assert_eq!(candidates[names::GRUPO_EMBALAGEM].value, "II");
    }

    #[test]
    fn extraction_is_idempotent() {
        let text = "Nome do produto: Acetona\nNumero ONU: UN1090\nCAS 67-64-1";
        assert_eq!(extract(text), extract(text));
    }
}
