use serde::Deserialize;

use crate::catalog::{CategoryOrder, ChunkRef, UNCATEGORIZED, build_pages};
use crate::models::Word;

/// 一条主题规则：分类名完全等于 `exact` 之一，或包含任一 `keywords`，即归入该主题
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ThemeRule {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub exact: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Default for ThemeRule {
    fn default() -> Self {
        default_fallback_theme()
    }
}

impl ThemeRule {
    fn new(id: &str, label: &str, exact: &[&str], keywords: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            exact: exact.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn matches(&self, category: &str) -> bool {
        self.exact.iter().any(|e| e == category) || self.keywords.iter().any(|k| category.contains(k.as_str()))
    }
}

pub fn default_themes() -> Vec<ThemeRule> {
    vec![
        ThemeRule::new("custom", "⭐ 自建與其他", &["自建", "綜合", UNCATEGORIZED], &["補遺"]),
        ThemeRule::new(
            "life",
            "🏠 基礎生活篇",
            &[],
            &["人物", "職業", "身體", "健康", "家庭", "居家", "飲食", "食物", "服飾", "配件"],
        ),
        ThemeRule::new(
            "env",
            "🌍 社區與環境篇",
            &[],
            &[
                "學校", "教育", "地點", "交通", "運輸", "旅遊", "休閒", "運動", "自然", "天氣", "動物",
                "昆蟲", "植物",
            ],
        ),
        ThemeRule::new(
            "abstract",
            "🧠 抽象與社會篇",
            &[],
            &[
                "時間", "空間", "數字", "社會", "溝通", "動作", "行為", "情感", "個性", "特質", "狀態",
                "人格",
            ],
        ),
    ]
}

pub fn default_fallback_theme() -> ThemeRule {
    ThemeRule::new(
        "grammar",
        "🔤 文法與詞性篇",
        &[],
        &[
            "名詞", "動詞", "形容詞", "副詞", "代名詞", "介系詞", "連接詞", "冠詞", "限定詞", "助動詞",
            "感嘆詞", "文法",
        ],
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    Theme(String),
    Fallback,
    Own(String),
}

/// 有序规则表，先匹配先赢
#[derive(Debug, Clone)]
pub struct ThemeRules {
    themes: Vec<ThemeRule>,
    fallback: ThemeRule,
}

impl Default for ThemeRules {
    fn default() -> Self {
        Self::new(default_themes(), default_fallback_theme())
    }
}

impl ThemeRules {
    pub fn new(themes: Vec<ThemeRule>, fallback: ThemeRule) -> Self {
        Self { themes, fallback }
    }

    pub fn classify(&self, category: &str) -> Bucket {
        if let Some(rule) = self.themes.iter().find(|r| r.matches(category)) {
            return Bucket::Theme(rule.id.clone());
        }
        if self.fallback.matches(category) {
            return Bucket::Fallback;
        }
        Bucket::Own(category.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuOption {
    pub label: String,
    pub value: ChunkRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MenuGroup {
    pub label: String,
    pub options: Vec<MenuOption>,
}

fn options_for(words: &[Word], category: &str, page_size: usize) -> Vec<MenuOption> {
    let pages = build_pages(words, category, page_size);
    let count: usize = pages.iter().map(|p| p.words.len()).sum();
    let multi = pages.len() > 1;
    let mut start = 1;
    pages
        .iter()
        .map(|page| {
            let end = start + page.words.len() - 1;
            let label = if multi {
                format!("{}-{} ({}~{})", category, page.number(), start, end)
            } else {
                format!("{} ({})", category, count)
            };
            start = end + 1;
            MenuOption {
                label,
                value: ChunkRef::new(category, page.index),
            }
        })
        .collect()
}

/// 下拉菜单分组：主题组（非空）→ 各自独立的分类 → 兜底的文法组
pub fn group_for_menu(
    words: &[Word],
    order: &CategoryOrder,
    rules: &ThemeRules,
    page_size: usize,
) -> Vec<MenuGroup> {
    let mut themed: Vec<MenuGroup> = rules
        .themes
        .iter()
        .map(|r| MenuGroup {
            label: r.label.clone(),
            options: Vec::new(),
        })
        .collect();
    let mut fallback = MenuGroup {
        label: rules.fallback.label.clone(),
        options: Vec::new(),
    };
    let mut separate = Vec::new();

    for category in order.sorted_categories(words) {
        let options = options_for(words, &category, page_size);
        match rules.classify(&category) {
            Bucket::Theme(id) => {
                if let Some(pos) = rules.themes.iter().position(|r| r.id == id) {
                    themed[pos].options.extend(options);
                }
            }
            Bucket::Fallback => fallback.options.extend(options),
            Bucket::Own(name) => separate.push(MenuGroup {
                label: format!("📂 {}", name),
                options,
            }),
        }
    }

    let mut groups: Vec<MenuGroup> = themed.into_iter().filter(|g| !g.options.is_empty()).collect();
    groups.extend(separate);
    if !fallback.options.is_empty() {
        groups.push(fallback);
    }
    groups
}
