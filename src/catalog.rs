//! Category listing and fixed-size paging over a flat word list.
//!
//! `build_pages` and `select_page` share one slicing routine so that a page
//! number always names the same set of words, whoever asks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::models::{ProgressMap, Word};

pub const ALL_CATEGORY: &str = "All";
pub const UNCATEGORIZED: &str = "未分類";
pub const DEFAULT_PAGE_SIZE: usize = 12;

// 与总览同名的分类会被改写成这个名字
const ESCAPED_ALL: &str = "All*";

pub const CORE_SUPER: &str = "超級高頻";
pub const CORE_READING: &str = "閱測高頻";
pub const CORE_PAST: &str = "歷年考點";

// UI 分类排序顺序
pub const CATEGORY_SORT_ORDER: &[&str] = &[
    "自建",
    // 基础生活篇
    "人物/職業", "人物", "職業",
    "身體/醫療", "身體部位", "健康",
    "家庭", "居家/生活",
    "飲食/烹飪", "食物",
    "學校/教育", "學校",
    "服飾/配件",
    // 社区与环境篇
    "地點/位置", "地點",
    "交通/旅遊", "交通運輸",
    "休閒/運動",
    "自然/環境", "天氣與自然現象", "動物與昆蟲", "植物",
    // 抽象与社会篇
    "時間/空間", "時間",
    "數字",
    "社會/溝通",
    "動作/行為",
    "情感/個性", "人格特質",
    "特質/狀態",
    // 文法与词性篇
    "其他名詞", "名詞",
    "其他動詞", "動詞",
    "其他形容詞", "形容詞",
    "其他副詞", "副詞",
    "代名詞",
    "介系詞",
    "連接詞",
    "冠詞與限定詞",
    "助動詞",
    "感嘆詞",
    "文法/其他",
    "2000單-補遺",
];

/// 单字实际归属的分类名：空白归入“未分類”，与 "All" 撞名的会被转义
pub fn category_of(word: &Word) -> &str {
    normalize_category(&word.category)
}

pub fn normalize_category(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        UNCATEGORIZED
    } else if trimmed == ALL_CATEGORY {
        ESCAPED_ALL
    } else {
        trimmed
    }
}

pub fn is_reserved_category(name: &str) -> bool {
    name.trim() == ALL_CATEGORY
}

/// Two-tier category order: priority list position first, then the rest by name.
#[derive(Debug, Clone)]
pub struct CategoryOrder {
    priority: Vec<String>,
}

impl Default for CategoryOrder {
    fn default() -> Self {
        Self::new(CATEGORY_SORT_ORDER.iter().map(|s| s.to_string()).collect())
    }
}

impl CategoryOrder {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    fn rank(&self, category: &str) -> Option<usize> {
        self.priority.iter().position(|c| c == category)
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match (self.rank(a), self.rank(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => collate(a, b),
        }
    }

    /// 排好序的分类名（不含 "All"），同样输入集合永远给出同样顺序
    pub fn sorted_categories(&self, words: &[Word]) -> Vec<String> {
        let unique: BTreeSet<&str> = words.iter().map(category_of).collect();
        let mut categories: Vec<String> = unique.into_iter().map(str::to_string).collect();
        categories.sort_by(|a, b| self.compare(a, b));
        categories
    }

    /// 导航用的分类列表，永远以 "All" 开头
    pub fn list_categories(&self, words: &[Word]) -> Vec<String> {
        let mut categories = vec![ALL_CATEGORY.to_string()];
        categories.extend(self.sorted_categories(words));
        categories
    }
}

// 不区分大小写比较，相同时再按原字符比较以保证全序
fn collate(a: &str, b: &str) -> Ordering {
    let fold = |s: &str| s.to_lowercase();
    fold(a).cmp(&fold(b)).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<'a> {
    pub category: String,
    /// 0-based chunk index
    pub index: usize,
    pub words: Vec<&'a Word>,
}

impl Page<'_> {
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn key(&self) -> PageKey {
        PageKey::new(&self.category, self.number())
    }

    pub fn word_ids(&self) -> Vec<String> {
        self.words.iter().map(|w| w.id.clone()).collect()
    }
}

/// 按原始顺序筛出某个分类的单字；"All" 返回全部
pub fn words_in_category<'a>(words: &'a [Word], category: &str) -> Vec<&'a Word> {
    if category == ALL_CATEGORY {
        return words.iter().collect();
    }
    words.iter().filter(|w| category_of(w) == category).collect()
}

pub fn page_count(len: usize, page_size: usize) -> usize {
    len.div_ceil(page_size.max(1))
}

pub fn build_pages<'a>(words: &'a [Word], category: &str, page_size: usize) -> Vec<Page<'a>> {
    words_in_category(words, category)
        .chunks(page_size.max(1))
        .enumerate()
        .map(|(index, chunk)| Page {
            category: category.to_string(),
            index,
            words: chunk.to_vec(),
        })
        .collect()
}

/// 越界的 chunk index 返回空切片而不是错误
pub fn select_page<'a>(
    words: &'a [Word],
    category: &str,
    chunk_index: usize,
    page_size: usize,
) -> Vec<&'a Word> {
    words_in_category(words, category)
        .chunks(page_size.max(1))
        .nth(chunk_index)
        .map(|chunk| chunk.to_vec())
        .unwrap_or_default()
}

/// 导航选择器 `"{category}__{chunkIndex}"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRef {
    pub category: String,
    pub chunk_index: usize,
}

impl ChunkRef {
    pub fn new(category: impl Into<String>, chunk_index: usize) -> Self {
        Self {
            category: category.into(),
            chunk_index,
        }
    }

    pub fn page_number(&self) -> usize {
        self.chunk_index + 1
    }

    pub fn page_key(&self) -> PageKey {
        PageKey::new(&self.category, self.page_number())
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.category, self.chunk_index)
    }
}

impl FromStr for ChunkRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, index) = s
            .rsplit_once("__")
            .ok_or_else(|| anyhow::anyhow!("不是分页选择器: {}", s))?;
        let chunk_index = index
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("分页序号无效: {}", index))?;
        Ok(ChunkRef::new(category, chunk_index))
    }
}

/// 完成标记的键 `"{category}-{pageNumber}"`，页码从 1 开始
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey(String);

impl PageKey {
    pub fn new(category: &str, page_number: usize) -> Self {
        PageKey(format!("{}-{}", category, page_number))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PageKey {
    fn from(raw: String) -> Self {
        PageKey(raw)
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    All,
    Mistake,
    Unfamiliar,
    CoreSuper,
    CoreReading,
    CorePast,
}

impl FromStr for FilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(FilterMode::All),
            "mistake" => Ok(FilterMode::Mistake),
            "unfamiliar" => Ok(FilterMode::Unfamiliar),
            "core_super" => Ok(FilterMode::CoreSuper),
            "core_reading" => Ok(FilterMode::CoreReading),
            "core_past" => Ok(FilterMode::CorePast),
            other => anyhow::bail!("未知的筛选模式: {}", other),
        }
    }
}

impl FilterMode {
    pub fn apply<'a>(
        self,
        words: Vec<&'a Word>,
        marked: &BTreeSet<String>,
        mistakes: &BTreeMap<String, u32>,
    ) -> Vec<&'a Word> {
        match self {
            FilterMode::All => words,
            FilterMode::Mistake => words
                .into_iter()
                .filter(|w| mistakes.get(&w.id).copied().unwrap_or(0) > 0)
                .collect(),
            FilterMode::Unfamiliar => words.into_iter().filter(|w| marked.contains(&w.id)).collect(),
            FilterMode::CoreSuper => words.into_iter().filter(|w| has_core_tag(w, CORE_SUPER)).collect(),
            FilterMode::CoreReading => words.into_iter().filter(|w| has_core_tag(w, CORE_READING)).collect(),
            FilterMode::CorePast => words.into_iter().filter(|w| has_core_tag(w, CORE_PAST)).collect(),
        }
    }
}

fn has_core_tag(word: &Word, tag: &str) -> bool {
    word.core_tag.as_deref() == Some(tag)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkProgress {
    pub chunk: ChunkRef,
    pub label: String,
    pub total: usize,
    pub viewed: usize,
    pub mastered: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryProgress {
    pub category: String,
    pub total: usize,
    pub viewed: usize,
    pub mastered: usize,
    pub chunks: Vec<ChunkProgress>,
}

impl CategoryProgress {
    pub fn viewed_pct(&self) -> u32 {
        percent(self.viewed, self.total)
    }

    pub fn mastered_pct(&self) -> u32 {
        percent(self.mastered, self.total)
    }
}

fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        ((part as f64 / total as f64) * 100.0).round() as u32
    }
}

/// 学习地图：每个分类、每一页的已读数和精熟数
pub fn progress_overview(
    words: &[Word],
    progress: &ProgressMap,
    order: &CategoryOrder,
    page_size: usize,
) -> Vec<CategoryProgress> {
    order
        .sorted_categories(words)
        .into_iter()
        .map(|category| {
            let pages = build_pages(words, &category, page_size);
            let multi = pages.len() > 1;
            let chunks: Vec<ChunkProgress> = pages
                .iter()
                .map(|page| {
                    let (viewed, mastered) =
                        page.words.iter().fold((0, 0), |(v, m), w| match progress.get(&w.id) {
                            Some(p) => (
                                v + usize::from(p.map_viewed),
                                m + usize::from(p.correct_count >= 2),
                            ),
                            None => (v, m),
                        });
                    ChunkProgress {
                        chunk: ChunkRef::new(category.clone(), page.index),
                        label: if multi {
                            format!("{}-{}", category, page.number())
                        } else {
                            category.clone()
                        },
                        total: page.words.len(),
                        viewed,
                        mastered,
                    }
                })
                .collect();
            CategoryProgress {
                total: chunks.iter().map(|c| c.total).sum(),
                viewed: chunks.iter().map(|c| c.viewed).sum(),
                mastered: chunks.iter().map(|c| c.mastered).sum(),
                category,
                chunks,
            }
        })
        .collect()
}
