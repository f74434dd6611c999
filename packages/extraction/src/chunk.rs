//! Text chunking that bounds language-model input size.

use std::collections::BTreeMap;

/// A labeled piece of document text sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub label: String,
    pub text: String,
}

impl Chunk {
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
        }
    }
}

/// Splits documents into chunks, preferring FDS section boundaries.
///
/// Stateless and restartable: the same input always produces the same
/// chunk sequence.
#[derive(Debug, Clone)]
pub struct ChunkStrategy {
    max_characters: usize,
}

const CHUNK_SIZE_FLOOR: usize = 1000;

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self::new(4000)
    }
}

impl ChunkStrategy {
    pub fn new(max_characters: usize) -> Self {
        Self {
            max_characters: max_characters.max(CHUNK_SIZE_FLOOR),
        }
    }

    /// Produce ordered chunks: one per known section, else fixed windows.
    pub fn make_chunks(&self, text: &str, sections: Option<&BTreeMap<u8, String>>) -> Vec<Chunk> {
        if let Some(sections) = sections {
            if !sections.is_empty() {
                return sections
                    .iter()
                    .filter(|(_, body)| !body.trim().is_empty())
                    .map(|(number, body)| Chunk::new(format!("Secao {number}"), body.clone()))
                    .collect();
            }
        }
        self.split_by_length(text)
    }

    fn split_by_length(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.max_characters)
            .enumerate()
            .map(|(i, window)| {
                Chunk::new(format!("Chunk {}", i + 1), window.iter().collect::<String>())
            })
            .collect()
    }
}
