//! Разложение слогов хангыля (U+AC00..=U+D7A3) на чамо.

/// Начальные согласные (초성).
pub const INITIALS: [char; 19] = [
    'ㄱ', 'ㄲ', 'ㄴ', 'ㄷ', 'ㄸ', 'ㄹ', 'ㅁ', 'ㅂ', 'ㅃ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅉ', 'ㅊ', 'ㅋ',
    'ㅌ', 'ㅍ', 'ㅎ',
];

/// Гласные (중성).
pub const MEDIALS: [char; 21] = [
    'ㅏ', 'ㅐ', 'ㅑ', 'ㅒ', 'ㅓ', 'ㅔ', 'ㅕ', 'ㅖ', 'ㅗ', 'ㅘ', 'ㅙ', 'ㅚ', 'ㅛ', 'ㅜ', 'ㅝ', 'ㅞ',
    'ㅟ', 'ㅠ', 'ㅡ', 'ㅢ', 'ㅣ',
];

/// Маркер отсутствующей конечной согласной.
pub const NO_FINAL: char = '∅';

/// Конечные согласные (종성), включая [`NO_FINAL`] на позиции 0.
pub const FINALS: [char; 28] = [
    NO_FINAL, 'ㄱ', 'ㄲ', 'ㄳ', 'ㄴ', 'ㄵ', 'ㄶ', 'ㄷ', 'ㄹ', 'ㄺ', 'ㄻ', 'ㄼ', 'ㄽ', 'ㄾ', 'ㄿ', 'ㅀ',
    'ㅁ', 'ㅂ', 'ㅄ', 'ㅅ', 'ㅆ', 'ㅇ', 'ㅈ', 'ㅊ', 'ㅋ', 'ㅌ', 'ㅍ', 'ㅎ',
];

/// Токен пробела между словами.
pub const SPACE_TOKEN: char = ' ';

const SYLLABLE_BASE: u32 = 0xAC00;
const SYLLABLE_LAST: u32 = 0xD7A3;

/// Является ли символ готовым слогом хангыля.
pub fn is_syllable(c: char) -> bool {
    (SYLLABLE_BASE..=SYLLABLE_LAST).contains(&(c as u32))
}

/// Разложить слог на (начальная, средняя, конечная). `None` для не-слогов.
pub fn split_syllable(c: char) -> Option<(char, char, char)> {
    if !is_syllable(c) {
        return None;
    }
    let diff = c as u32 - SYLLABLE_BASE;
    let final_idx = (diff % 28) as usize;
    let rest = (diff / 28) as usize;
    Some((INITIALS[rest / 21], MEDIALS[rest % 21], FINALS[final_idx]))
}
