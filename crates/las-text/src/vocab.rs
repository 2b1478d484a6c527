//! Словарь меток LAS: пробел и все чамо без повторов, отсортированные по коду.

use std::collections::{BTreeSet, HashMap};

use las_core::{LasError, LasResult};

use crate::jamo::{FINALS, INITIALS, MEDIALS, SPACE_TOKEN};

/// Фиксированный набор выходных символов.
///
/// Создаётся один раз и не изменяется; индекс метки = номер класса на выходе Speller.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    id_to_label: Vec<char>,
    label_to_id: HashMap<char, usize>,
}

impl Vocabulary {
    /// Корейский словарь чамо (53 метки).
    pub fn korean_jamo() -> Self {
        let labels: BTreeSet<char> = std::iter::once(SPACE_TOKEN)
            .chain(INITIALS)
            .chain(MEDIALS)
            .chain(FINALS)
            .collect();
        Self::from_labels(labels)
    }

    fn from_labels(labels: impl IntoIterator<Item = char>) -> Self {
        let id_to_label: Vec<char> = labels.into_iter().collect();
        let label_to_id = id_to_label
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
        Self {
            id_to_label,
            label_to_id,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_label.is_empty()
    }

    pub fn labels(&self) -> &[char] {
        &self.id_to_label
    }

    pub fn id(&self, label: char) -> Option<usize> {
        self.label_to_id.get(&label).copied()
    }

    pub fn label(&self, id: usize) -> Option<char> {
        self.id_to_label.get(id).copied()
    }

    /// Перевести нормализованный текст в индексы классов.
    pub fn encode(&self, text: &str) -> LasResult<Vec<usize>> {
        text.chars()
            .map(|c| {
                self.id(c)
                    .ok_or_else(|| LasError::Text(format!("label {c:?} is not in the vocabulary")))
            })
            .collect()
    }

    /// Перевести индексы классов обратно в текст. Неизвестные индексы пропускаются.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter().filter_map(|&id| self.label(id)).collect()
    }
}
