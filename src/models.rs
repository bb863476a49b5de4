use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

// 单字资料，字段名与试算表后端保持一致（camelCase）
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Word {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub term: String,
    pub phonetic: String,
    pub part_of_speech: String,
    pub meaning: String,
    pub example: String,
    pub example_translation: String,
    pub category: String,
    #[serde(deserialize_with = "string_or_number")]
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub past_exam_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub exam_source: Option<String>,
    pub syllables: String,
    pub tags: String,
    pub mistake_count: u32,
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "blank_as_none")]
    pub core_tag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    #[serde(default)]
    pub word_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_term: Option<String>,
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub correct_answer_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammar_tag: Option<String>,
}

/// 旧版整包进度，debounce 之后整体上传
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProgress {
    pub marked_unfamiliar: Vec<String>,
    pub quiz_counts: BTreeMap<String, u32>,
    pub last_questions: BTreeMap<String, QuizQuestion>,
    pub mistake_questions: Vec<QuizQuestion>,
    pub mistake_counts: BTreeMap<String, u32>,
    pub completed_pages: Vec<String>,
}

// 服务端权威的单字学习记录
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UserVocabProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_id: Option<String>,
    pub map_viewed: bool,
    pub tested_count: u32,
    pub correct_count: u32,
    pub next_review_date: String,
    pub is_marked: bool,
}

impl UserVocabProgress {
    /// 翻页标记完成时为没有记录的单字补建一条
    pub fn viewed_now() -> Self {
        Self {
            map_viewed: true,
            next_review_date: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn mastery(&self) -> MasteryStatus {
        if self.correct_count >= 2 {
            MasteryStatus::Mastered
        } else if self.correct_count == 1 {
            MasteryStatus::PartiallyCorrect
        } else if self.map_viewed {
            MasteryStatus::Viewed
        } else {
            MasteryStatus::Unseen
        }
    }
}

pub type ProgressMap = HashMap<String, UserVocabProgress>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MasteryStatus {
    Unseen,
    Viewed,
    PartiallyCorrect,
    Mastered,
}

impl MasteryStatus {
    pub fn label(self) -> &'static str {
        match self {
            MasteryStatus::Unseen => "未學",
            MasteryStatus::Viewed => "已讀",
            MasteryStatus::PartiallyCorrect => "淺層",
            MasteryStatus::Mastered => "精熟",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SrsRating {
    Again,
    Hard,
    Good,
    Easy,
}

impl SrsRating {
    /// 本地对“不熟”标记的影响：Some(true) 加入，Some(false) 移除，None 不变
    pub fn marking_effect(self) -> Option<bool> {
        match self {
            SrsRating::Again => Some(true),
            SrsRating::Easy => Some(false),
            SrsRating::Hard | SrsRating::Good => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SrsRating::Again => "again",
            SrsRating::Hard => "hard",
            SrsRating::Good => "good",
            SrsRating::Easy => "easy",
        }
    }
}

impl fmt::Display for SrsRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SrsRating {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "again" => Ok(SrsRating::Again),
            "hard" => Ok(SrsRating::Hard),
            "good" => Ok(SrsRating::Good),
            "easy" => Ok(SrsRating::Easy),
            other => anyhow::bail!("未知的评分: {} (可选 again/hard/good/easy)", other),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizResultSubmission {
    pub word_id: String,
    pub is_correct: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DailyMission {
    pub new_words: Vec<Word>,
    pub review_words: Vec<Word>,
    pub mastery_words: Vec<Word>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionKind {
    New,
    Review,
    Mastery,
}

impl DailyMission {
    pub fn words(&self, kind: MissionKind) -> &[Word] {
        match kind {
            MissionKind::New => &self.new_words,
            MissionKind::Review => &self.review_words,
            MissionKind::Mastery => &self.mastery_words,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct GrammarScore {
    pub highest_score: u32,
    pub stars: u32,
}

pub type GrammarMap = HashMap<String, GrammarScore>;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct FamilyStats {
    pub leaderboard: Vec<LeaderboardEntry>,
    #[serde(default)]
    pub family_progress: FamilyProgress,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LeaderboardEntry {
    pub id: Option<String>,
    pub username: String,
    pub avatar: String,
    pub quiz_count: u32,
    pub mistake_count: u32,
    pub mastery_pct: f64,
    pub title: String,
    pub color: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct FamilyProgress {
    pub total_words: u32,
    pub mastered_words: u32,
    pub viewed_words: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Article {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    pub english: String,
    pub chinese: String,
    pub created_at: String,
}

// 后端有时把数字列原样回传（如 level = 1200）
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}
