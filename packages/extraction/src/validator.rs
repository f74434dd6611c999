//! Syntax and range validation for extracted field values.
//!
//! Pure functions: a candidate goes in, a tri-state status comes out. The
//! sentinels (`NAO ENCONTRADO`, `ERRO`) pass the syntax check untouched and
//! fall through to the confidence gates.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::document::ValidationStatus;
use crate::types::field::{names, Candidate, ERROR_VALUE, NOT_FOUND};

const UN_MIN: u32 = 4;
const UN_MAX: u32 = 3506;

/// The 21 UN hazard classes and divisions.
const VALID_CLASSES: &[&str] = &[
    "1", "1.1", "1.2", "1.3", "1.4", "1.5", "1.6", "2.1", "2.2", "2.3", "3", "4.1", "4.2", "4.3",
    "5.1", "5.2", "6.1", "6.2", "7", "8", "9",
];

fn cas_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{2,7}-\d{2}-\d$").expect("CAS pattern is valid"))
}

fn class_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d(?:\.\d)?").expect("class token pattern is valid"))
}

fn is_sentinel(value: &str) -> bool {
    value == NOT_FOUND || value == ERROR_VALUE
}

/// Validate a candidate for a named field.
///
/// Returns the status plus an optional human-readable message for
/// `Invalid` results. Fields with no validator return `NotValidated`.
pub fn validate_field(field_name: &str, candidate: &Candidate) -> (ValidationStatus, Option<String>) {
    if !(0.0..=1.0).contains(&candidate.confidence) {
        return (
            ValidationStatus::Invalid,
            Some("Confianca fora do intervalo [0, 1].".to_string()),
        );
    }

    let syntax = match field_name {
        names::NUMERO_ONU => check_un_number(&candidate.value),
        names::NUMERO_CAS => check_cas(&candidate.value),
        names::CLASSIFICACAO_ONU => check_class(&candidate.value),
        names::NOME_PRODUTO => check_name(&candidate.value, "Nome do produto"),
        names::FABRICANTE => check_name(&candidate.value, "Nome do fabricante"),
        names::GRUPO_EMBALAGEM => check_packing_group(&candidate.value),
        _ => return (ValidationStatus::NotValidated, None),
    };

    if let Err(message) = syntax {
        return (ValidationStatus::Invalid, Some(message));
    }

    if candidate.confidence >= 0.9 {
        (ValidationStatus::Valid, None)
    } else if candidate.confidence >= 0.7 {
        (ValidationStatus::Warning, None)
    } else {
        (
            ValidationStatus::Invalid,
            Some("Confianca abaixo do limiar minimo (0.7).".to_string()),
        )
    }
}

fn check_un_number(value: &str) -> Result<(), String> {
    if is_sentinel(value) {
        return Ok(());
    }
    let mut value = value.trim().to_uppercase();
    if let Some(stripped) = value.strip_prefix("UN") {
        value = stripped.trim().to_string();
    }
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err("Numero ONU deve conter 4 digitos.".to_string());
    }
    let number: u32 = value.parse().map_err(|_| "Numero ONU invalido.".to_string())?;
    if !(UN_MIN..=UN_MAX).contains(&number) {
        return Err("Numero ONU fora do intervalo valido.".to_string());
    }
    Ok(())
}

fn check_cas(value: &str) -> Result<(), String> {
    if is_sentinel(value) {
        return Ok(());
    }
    if !cas_pattern().is_match(value.trim()) {
        return Err("Numero CAS deve seguir o formato ####-##-#.".to_string());
    }
    Ok(())
}

fn check_class(value: &str) -> Result<(), String> {
    if is_sentinel(value) {
        return Ok(());
    }
    let token = class_token_pattern()
        .find(value)
        .map(|m| m.as_str())
        .unwrap_or_else(|| value.trim());
    if !VALID_CLASSES.contains(&token) {
        return Err("Classe ONU invalida.".to_string());
    }
    Ok(())
}

fn check_name(value: &str, label: &str) -> Result<(), String> {
    if is_sentinel(value) {
        return Ok(());
    }
    let trimmed = value.trim();
    if trimmed.chars().count() < 3 {
        return Err(format!("{label} muito curto."));
    }
    if trimmed.chars().count() > 200 {
        return Err(format!("{label} muito longo."));
    }
    Ok(())
}

fn check_packing_group(value: &str) -> Result<(), String> {
    if is_sentinel(value) {
        return Ok(());
    }
    match value.trim().to_uppercase().as_str() {
        "I" | "II" | "III" => Ok(()),
        _ => Err("Grupo de embalagem deve ser I, II ou III.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(value: &str, confidence: f64) -> Candidate {
        Candidate {
            value: value.to_string(),
            confidence,
            context: String::new(),
            source_urls: vec![],
        }
    }

    #[test]
    fn un_numbers_in_range_are_accepted() {
        let (status, _) = validate_field(names::NUMERO_ONU, &candidate("1090", 0.95));
        assert_eq!(status, ValidationStatus::Valid);

        let (status, _) = validate_field(names::NUMERO_ONU, &candidate("UN 1203", 0.95));
        assert_eq!(status, ValidationStatus::Valid);
    }

    #[test]
    fn un_number_out_of_range_is_invalid() {
        let (status, message) = validate_field(names::NUMERO_ONU, &candidate("9999", 0.95));
        assert_eq!(status, ValidationStatus::Invalid);
        assert!(message.unwrap().contains("intervalo"));

        let (status, _) = validate_field(names::NUMERO_ONU, &candidate("0003", 0.95));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn cas_format_is_enforced() {
        let (status, _) = validate_field(names::NUMERO_CAS, &candidate("67-64-1", 0.95));
        assert_eq!(status, ValidationStatus::Valid);

        let (status, _) = validate_field(names::NUMERO_CAS, &candidate("67/64/1", 0.95));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn class_is_extracted_from_noisy_value() {
        let (status, _) = validate_field(names::CLASSIFICACAO_ONU, &candidate("Classe 6.1", 0.95));
        assert_eq!(status, ValidationStatus::Valid);

        let (status, _) = validate_field(names::CLASSIFICACAO_ONU, &candidate("6.9", 0.95));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn packing_group_accepts_roman_numerals_only() {
        let (status, _) = validate_field(names::GRUPO_EMBALAGEM, &candidate("II", 0.95));
        assert_eq!(status, ValidationStatus::Valid);

        let (status, _) = validate_field(names::GRUPO_EMBALAGEM, &candidate("2", 0.95));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn confidence_gates_apply_after_syntax() {
        let (status, _) = validate_field(names::NUMERO_ONU, &candidate("1090", 0.8));
        assert_eq!(status, ValidationStatus::Warning);

        let (status, message) = validate_field(names::NUMERO_ONU, &candidate("1090", 0.3));
        assert_eq!(status, ValidationStatus::Invalid);
        assert!(message.unwrap().contains("limiar"));
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        let (status, _) = validate_field(names::NUMERO_ONU, &candidate("1090", 1.2));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn sentinels_pass_syntax_but_not_confidence() {
        let (status, _) = validate_field(names::NUMERO_ONU, &candidate(NOT_FOUND, 0.0));
        assert_eq!(status, ValidationStatus::Invalid);
    }

    #[test]
    fn unknown_fields_are_not_validated() {
        let (status, message) =
            validate_field(names::INCOMPATIBILIDADES, &candidate("oxidantes fortes", 0.7));
        assert_eq!(status, ValidationStatus::NotValidated);
        assert!(message.is_none());
    }
}
