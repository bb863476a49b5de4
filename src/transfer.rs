use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use crate::catalog::normalize_category;
use crate::models::Word;

const BUNDLED_VOCABULARY: &str = include_str!("../data/default_vocabulary.csv");
const BUNDLED_CORE_TAGS: &str = include_str!("../data/core_tags.csv");

// CSV 的一行；数字列一律当字串读，避免 level 写成 1200 或 "1200" 时出错
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct WordRow {
    id: String,
    term: String,
    phonetic: String,
    part_of_speech: String,
    meaning: String,
    example: String,
    example_translation: String,
    category: String,
    level: String,
    syllables: String,
    exam_source: String,
}

impl WordRow {
    fn into_word(self) -> Word {
        Word {
            id: self.id.trim().to_string(),
            term: self.term.trim().to_string(),
            phonetic: self.phonetic,
            part_of_speech: self.part_of_speech,
            meaning: self.meaning,
            example: self.example,
            example_translation: self.example_translation,
            category: normalize_category(&self.category).to_string(),
            level: self.level.trim().to_string(),
            syllables: self.syllables,
            exam_source: Some(self.exam_source.trim().to_string()).filter(|s| !s.is_empty()),
            ..Default::default()
        }
    }

    fn from_word(word: &Word) -> Self {
        WordRow {
            id: word.id.clone(),
            term: word.term.clone(),
            phonetic: word.phonetic.clone(),
            part_of_speech: word.part_of_speech.clone(),
            meaning: word.meaning.clone(),
            example: word.example.clone(),
            example_translation: word.example_translation.clone(),
            category: word.category.clone(),
            level: word.level.clone(),
            syllables: word.syllables.clone(),
            exam_source: word.exam_source.clone().unwrap_or_default(),
        }
    }
}

/// 读取单字 CSV。空白单字跳过，同一档案里重复的单字（不分大小写）只留第一个。
pub fn read_words<R: Read>(reader: R) -> Result<Vec<Word>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
    let mut seen = HashSet::new();
    let mut words = Vec::new();

    for (line, row) in csv_reader.deserialize::<WordRow>().enumerate() {
        let row = row.with_context(|| format!("CSV 第 {} 行格式错误", line + 2))?;
        let word = row.into_word();
        if word.term.is_empty() {
            tracing::debug!(line = line + 2, "跳过没有单字的行");
            continue;
        }
        if !seen.insert(word.term.to_lowercase()) {
            tracing::debug!(term = %word.term, "跳过重复单字");
            continue;
        }
        words.push(word);
    }
    Ok(words)
}

pub fn write_words<W: Write>(writer: W, words: &[Word]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for word in words {
        csv_writer.serialize(WordRow::from_word(word))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn import_csv(path: &Path) -> Result<Vec<Word>> {
    let file = std::fs::File::open(path).with_context(|| format!("无法打开 {}", path.display()))?;
    read_words(file)
}

pub fn export_csv(path: &Path, words: &[Word]) -> Result<()> {
    let file = std::fs::File::create(path).with_context(|| format!("无法写入 {}", path.display()))?;
    write_words(file, words)
}

/// 远端无法连线时使用的内建单字表
pub fn bundled_vocabulary() -> Vec<Word> {
    match read_words(BUNDLED_VOCABULARY.as_bytes()) {
        Ok(words) => words,
        Err(e) => {
            tracing::error!(error = %e, "内建单字表无法解析");
            Vec::new()
        }
    }
}

/// 考试频率标签（小写单字 → 标签）；同一个字出现多次时后面的优先
pub fn core_tags() -> HashMap<String, String> {
    #[derive(Deserialize)]
    struct TagRow {
        term: String,
        tag: String,
    }

    let mut tags = HashMap::new();
    let mut reader = csv::Reader::from_reader(BUNDLED_CORE_TAGS.as_bytes());
    for row in reader.deserialize::<TagRow>() {
        match row {
            Ok(row) => {
                tags.insert(row.term.trim().to_lowercase(), row.tag);
            }
            Err(e) => tracing::warn!(error = %e, "略过无法解析的频率标签"),
        }
    }
    tags
}

/// 载入后补上频率标签，并用内建资料补回考古题来源与例句
pub fn apply_core_tags(words: &mut [Word], tags: &HashMap<String, String>, bundled: &[Word]) {
    let sources: HashMap<String, &Word> = bundled
        .iter()
        .filter(|w| w.exam_source.is_some())
        .map(|w| (w.term.trim().to_lowercase(), w))
        .collect();

    for word in words.iter_mut() {
        let key = word.term.trim().to_lowercase();
        if let Some(tag) = tags.get(&key) {
            word.core_tag = Some(tag.clone());
        }
        if let Some(source) = sources.get(&key) {
            word.exam_source = source.exam_source.clone();
            if !source.example.is_empty() {
                word.example = source.example.clone();
                if !source.example_translation.is_empty() {
                    word.example_translation = source.example_translation.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::UNCATEGORIZED;

    #[test]
    fn bundled_data_parses() {
        let words = bundled_vocabulary();
        assert!(words.len() >= 20);
        assert!(words.iter().all(|w| !w.id.is_empty() && !w.term.is_empty()));
        let kite = words.iter().find(|w| w.term == "kite").unwrap();
        assert_eq!(kite.exam_source.as_deref(), Some("114會考"));
        let however = words.iter().find(|w| w.term == "however").unwrap();
        assert_eq!(however.example, "It was cold; however, we went out.");
    }

    #[test]
    fn later_tag_lists_take_precedence() {
        let tags = core_tags();
        assert_eq!(tags.get("kite").map(String::as_str), Some("歷年考點"));
        // save 同时在历年考点和超级高频里
        assert_eq!(tags.get("save").map(String::as_str), Some("超級高頻"));
        assert_eq!(tags.get("finally").map(String::as_str), Some("閱測高頻"));
        assert_eq!(tags.get("in fact").map(String::as_str), Some("閱測高頻"));
    }

    #[test]
    fn tags_match_case_insensitively() {
        let mut words = vec![
            Word {
                term: "Kite".to_string(),
                example: "old".to_string(),
                ..Default::default()
            },
            Word {
                term: "Popular ".to_string(),
                ..Default::default()
            },
            Word {
                term: "zebra".to_string(),
                ..Default::default()
            },
        ];
        apply_core_tags(&mut words, &core_tags(), &bundled_vocabulary());
        assert_eq!(words[0].core_tag.as_deref(), Some("歷年考點"));
        assert_eq!(words[0].exam_source.as_deref(), Some("114會考"));
        assert!(words[0].example.starts_with("Look at the picture."));
        assert_eq!(words[1].core_tag.as_deref(), Some("超級高頻"));
        assert!(words[2].core_tag.is_none());
    }

    #[test]
    fn import_skips_blank_and_duplicate_terms() {
        let csv = "term, meaning ,category,level\napple,蘋果,,1200\n,空白,食物,1200\nApple,重複,食物,1200\nkite,風箏, 休閒/運動 ,2000\n";
        let words = read_words(csv.as_bytes()).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0].meaning, "蘋果");
        assert_eq!(words[0].category, UNCATEGORIZED);
        assert_eq!(words[1].category, "休閒/運動");
        assert_eq!(words[1].level, "2000");
    }

    #[test]
    fn export_then_import_keeps_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.csv");
        let words = bundled_vocabulary();
        export_csv(&path, &words).unwrap();
        let back = import_csv(&path).unwrap();
        assert_eq!(back.len(), words.len());
        assert_eq!(back[10].term, words[10].term);
        assert_eq!(back[10].exam_source, words[10].exam_source);
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = import_csv(&dir.path().join("nope.csv")).unwrap_err();
        assert!(err.to_string().contains("nope.csv"));
    }
}
