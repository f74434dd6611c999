//! Field definitions and candidate values.
//!
//! A [`FieldSpec`] describes one extractable field: its canonical name, a
//! human-facing label, and the prompt template used when a language model is
//! asked for it. The ordered default set defines the extraction scope.
//!
//! Every extraction stage (heuristics, model, retrieval) produces a
//! [`Candidate`] per field; stages keep the highest-confidence candidate seen.

use serde::{Deserialize, Serialize};

/// Sentinel value meaning "nothing found" for a field.
pub const NOT_FOUND: &str = "NAO ENCONTRADO";

/// Sentinel value recorded when a stage failed outright.
pub const ERROR_VALUE: &str = "ERRO";

/// Field name constants, matching the persisted `field_name` column.
pub mod names {
    pub const NUMERO_ONU: &str = "numero_onu";
    pub const NUMERO_CAS: &str = "numero_cas";
    pub const CLASSIFICACAO_ONU: &str = "classificacao_onu";
    pub const NOME_PRODUTO: &str = "nome_produto";
    pub const FABRICANTE: &str = "fabricante";
    pub const GRUPO_EMBALAGEM: &str = "grupo_embalagem";

    /// Only ever filled by the online completion step, never from the text.
    pub const INCOMPATIBILIDADES: &str = "incompatibilidades";
}

/// A proposed value for a field, with the stage's certainty and provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// The extracted value, or a sentinel (`NAO ENCONTRADO` / `ERRO`).
    pub value: String,

    /// Stage-reported certainty, always within `[0.0, 1.0]`.
    pub confidence: f64,

    /// Text surrounding the match, or a stage tag for non-textual origins.
    pub context: String,

    /// URLs backing the value when it came from the web.
    #[serde(default)]
    pub source_urls: Vec<String>,
}

impl Candidate {
    /// Create a candidate, clamping confidence into `[0.0, 1.0]`.
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence: confidence.clamp(0.0, 1.0),
            context: String::new(),
            source_urls: Vec::new(),
        }
    }

    /// The placeholder used when no stage produced anything.
    pub fn not_found() -> Self {
        Self::new(NOT_FOUND, 0.0)
    }

    /// Placeholder for a failed stage, keeping the error text as context.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ERROR_VALUE, 0.0).with_context(message)
    }

    /// Attach surrounding context.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Attach source URLs.
    pub fn with_source_urls(mut self, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.source_urls = urls.into_iter().map(|u| u.into()).collect();
        self
    }

    /// Whether the candidate carries a real value rather than a sentinel.
    pub fn is_found(&self) -> bool {
        self.value != NOT_FOUND && self.value != ERROR_VALUE && !self.value.trim().is_empty()
    }
}

impl Default for Candidate {
    fn default() -> Self {
        Self::not_found()
    }
}

/// Immutable description of one extractable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical name, used as the persistence key.
    pub name: String,

    /// Human-facing label, used in prompts and reports.
    pub label: String,

    /// Prompt template with `{chunk_label}` and `{document_text}` holes.
    pub prompt_template: String,
}

impl FieldSpec {
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        prompt_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            prompt_template: prompt_template.into(),
        }
    }

    /// Render the prompt for one chunk of document text.
    pub fn prompt(&self, chunk_label: &str, document_text: &str) -> String {
        self.prompt_template
            .replace("{chunk_label}", chunk_label)
            .replace("{document_text}", document_text)
    }
}

/// The ordered default field set for Brazilian FDS documents.
pub fn default_field_specs() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new(
            names::NUMERO_ONU,
            "Numero ONU",
            "TAREFA: Extraia o numero ONU (UN number) do produto quimico.\n\
             Se existir, responda apenas com o numero de quatro digitos.\n\
             Se nao encontrar, responda exatamente com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
        FieldSpec::new(
            names::NUMERO_CAS,
            "Numero CAS",
            "TAREFA: Identifique o numero CAS do produto.\n\
             Retorne no formato ####-##-# (ou similar com 2 a 7 digitos na primeira parte).\n\
             Se nao encontrar, responda com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
        FieldSpec::new(
            names::CLASSIFICACAO_ONU,
            "Classificacao ONU",
            "TAREFA: Extraia a classe ONU (classe de risco) do produto.\n\
             Responda apenas com o numero da classe ou subclasse (ex.: 3, 2.3, 6.1).\n\
             Se nao encontrar, responda com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
        FieldSpec::new(
            names::NOME_PRODUTO,
            "Nome do Produto",
            "TAREFA: Identifique o nome completo do produto quimico.\n\
             Extraia da Secao 1 (Identificacao do Produto).\n\
             Responda apenas com o nome, sem informacoes adicionais.\n\
             Se nao encontrar, responda com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
        FieldSpec::new(
            names::FABRICANTE,
            "Fabricante",
            "TAREFA: Identifique o nome do fabricante ou fornecedor do produto.\n\
             Extraia da Secao 1 (Identificacao da Empresa).\n\
             Responda apenas com o nome da empresa.\n\
             Se nao encontrar, responda com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
        FieldSpec::new(
            names::GRUPO_EMBALAGEM,
            "Grupo de Embalagem",
            "TAREFA: Identifique o grupo de embalagem para transporte.\n\
             Deve ser I, II ou III (algarismos romanos).\n\
             Extraia da Secao 14 (Informacoes sobre Transporte).\n\
             Se nao encontrar, responda com 'NAO ENCONTRADO'.\n\n\
             TRECHO DA FDS ({chunk_label}):\n{document_text}\n",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_confidence_is_clamped() {
        assert_eq!(Candidate::new("x", 1.5).confidence, 1.0);
        assert_eq!(Candidate::new("x", -0.2).confidence, 0.0);
        assert_eq!(Candidate::new("x", 0.5).confidence, 0.5);
    }

    #[test]
    fn sentinels_are_not_found() {
        assert!(!Candidate::not_found().is_found());
        assert!(!Candidate::error("boom").is_found());
        assert!(Candidate::new("1090", 0.9).is_found());
    }

    #[test]
    fn prompt_fills_placeholders() {
        let spec = &default_field_specs()[0];
        let prompt = spec.prompt("Secao 14", "UN 1090");
        assert!(prompt.contains("Secao 14"));
        assert!(prompt.contains("UN 1090"));
        assert!(!prompt.contains("{chunk_label}"));
    }

    #[test]
    fn default_set_is_ordered_and_unique() {
        let specs = default_field_specs();
        assert_eq!(specs.len(), 6);
        assert_eq!(specs[0].name, names::NUMERO_ONU);
        let mut names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        names.dedup();
        assert_eq!(names.len(), 6);
    }
}
