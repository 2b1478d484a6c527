//! Нормализация транскриптов в последовательность чамо.

use std::path::Path;

use encoding_rs::EUC_KR;
use las_core::{LasError, LasResult};
use tracing::debug;

use crate::jamo::{SPACE_TOKEN, split_syllable};

/// Свернуть пробельные последовательности в один пробел и разложить слоги.
///
/// Всё, что не является слогом хангыля или пробелом (пунктуация, латиница,
/// служебные пометки вроде `b/`, `n/`), отбрасывается.
pub fn normalize_transcript(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut result = String::with_capacity(collapsed.len() * 3);
    for c in collapsed.chars() {
        if c == SPACE_TOKEN {
            result.push(SPACE_TOKEN);
        } else if let Some((initial, medial, fin)) = split_syllable(c) {
            result.push(initial);
            result.push(medial);
            result.push(fin);
        }
    }
    result
}

/// Прочитать первую строку транскрипта в кодировке CP949 и нормализовать её.
pub fn read_transcript(path: impl AsRef<Path>) -> LasResult<String> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;

    // В WHATWG-реестре EUC-KR = windows-949 (CP949).
    let (text, _, had_errors) = EUC_KR.decode(&bytes);
    if had_errors {
        return Err(LasError::Text(format!(
            "{:?} is not valid CP949 text",
            path
        )));
    }

    let first_line = text.lines().next().unwrap_or("");
    let normalized = normalize_transcript(first_line);
    debug!(
        "Транскрипт {:?}: {} символов -> {} чамо",
        path,
        first_line.chars().count(),
        normalized.chars().count()
    );
    Ok(normalized)
}
