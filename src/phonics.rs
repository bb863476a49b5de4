//! 单字卡片上的音节拆分提示，只是显示辅助，不追求语言学上的正确。

use regex::Regex;

use crate::models::Word;

const PHONETIC_VOWELS: &str = r"(?i)[aeiouɪɛeæɑɔʊʌəɝɚ!]+(?:ː|r|:|\x{02D0})?";
const SYLLABLE_MARKS: [char; 4] = ['-', '‧', '·', '.'];
const STRESS_MARKS: [char; 3] = ['ˈ', 'ˌ', '\''];

fn is_vowel(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), 'a' | 'e' | 'i' | 'o' | 'u' | 'y')
}

/// 依母音群切分拼字：子音* + 母音+，后面若整段都是子音就吃掉，
/// 否则遇到两个连续子音时带走第一个。结尾的“子音+e”并回前一段。
pub fn guess_syllables(term: &str) -> Vec<String> {
    if term.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = term.chars().collect();
    let len = chars.len();
    let mut parts: Vec<String> = Vec::new();
    let mut pos = 0;

    while pos < len {
        let mut i = pos;
        while i < len && !is_vowel(chars[i]) {
            i += 1;
        }
        if i == len {
            break;
        }
        while i < len && is_vowel(chars[i]) {
            i += 1;
        }
        if chars[i..].iter().all(|&c| !is_vowel(c)) {
            i = len;
        } else if i + 1 < len && !is_vowel(chars[i]) && !is_vowel(chars[i + 1]) {
            i += 1;
        }
        parts.push(chars[pos..i].iter().collect());
        pos = i;
    }

    if parts.is_empty() {
        return vec![term.to_string()];
    }
    if parts.len() > 1 && is_silent_e(&parts[parts.len() - 1]) {
        if let Some(last) = parts.pop() {
            if let Some(previous) = parts.last_mut() {
                previous.push_str(&last);
            }
        }
    }
    parts
}

// ^[^aeiouy]+e$
fn is_silent_e(part: &str) -> bool {
    let mut chars: Vec<char> = part.chars().collect();
    match chars.pop() {
        Some(last) if last.eq_ignore_ascii_case(&'e') => {
            !chars.is_empty() && chars.iter().all(|&c| !is_vowel(c))
        }
        _ => false,
    }
}

/// 资料里手写的音节提示，如 `ba-na-na` 或 `ba·na·na`
pub fn split_syllables(explicit: &str) -> Vec<String> {
    explicit
        .split(SYLLABLE_MARKS)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect()
}

pub fn display_parts(word: &Word) -> Vec<String> {
    if word.syllables.trim().is_empty() {
        guess_syllables(&word.term)
    } else {
        split_syllables(&word.syllables)
    }
}

/// 把音标按母音核心切开：两核之间有重音符号就切在符号前，
/// 只隔一个字符时切在核后，否则留一个子音给前一段
pub fn guess_phonetic_parts(phonetic: &str) -> Vec<String> {
    let content = strip_brackets(phonetic).trim();
    if content.is_empty() {
        return Vec::new();
    }
    let Ok(vowels) = Regex::new(PHONETIC_VOWELS) else {
        return vec![content.to_string()];
    };
    let nuclei: Vec<(usize, usize)> = vowels.find_iter(content).map(|m| (m.start(), m.end())).collect();
    if nuclei.is_empty() {
        return vec![content.to_string()];
    }

    let mut parts = Vec::new();
    let mut boundary = 0;
    for pair in nuclei.windows(2) {
        let (_, current_end) = pair[0];
        let (next_start, _) = pair[1];
        let between = &content[current_end..next_start];
        let offset = match between.find(STRESS_MARKS) {
            Some(stress) => stress,
            None if between.chars().count() <= 1 => 0,
            None => between.chars().next().map_or(0, char::len_utf8),
        };
        let split = current_end + offset;
        parts.push(content[boundary..split].to_string());
        boundary = split;
    }
    parts.push(content[boundary..].to_string());
    parts
}

fn strip_brackets(phonetic: &str) -> &str {
    let is_bracket = |c: char| matches!(c, '/' | '[' | ']');
    let s = phonetic.strip_prefix(is_bracket).unwrap_or(phonetic);
    s.strip_suffix(is_bracket).unwrap_or(s)
}
