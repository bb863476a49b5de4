use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::{self, CategoryOrder, FilterMode, category_of, is_reserved_category};
use crate::config::Config;
use crate::models::*;
use crate::remote::RemoteStore;
use crate::review::{PageCompletion, ReviewTracker, SyncTask};
use crate::transfer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularySource {
    Remote,
    Bundled,
}

/// 一次使用期间的全部状态：单字表、登入的用户、复习追踪器
pub struct Session<S: RemoteStore> {
    store: Arc<S>,
    tracker: ReviewTracker<S>,
    words: Vec<Word>,
    mission: Option<DailyMission>,
    grammar: GrammarMap,
    order: CategoryOrder,
    page_size: usize,
}

impl<S: RemoteStore> Session<S> {
    pub fn new(store: Arc<S>, config: &Config) -> Self {
        let tracker = ReviewTracker::new(
            Arc::clone(&store),
            Duration::from_millis(config.sync.save_debounce_ms),
        );
        Session {
            store,
            tracker,
            words: Vec::new(),
            mission: None,
            grammar: GrammarMap::new(),
            order: CategoryOrder::new(config.catalog.sort_order.clone()),
            page_size: config.paging.page_size,
        }
    }

    pub fn tracker(&self) -> &ReviewTracker<S> {
        &self.tracker
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn order(&self) -> &CategoryOrder {
        &self.order
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn username(&self) -> Option<String> {
        self.tracker.username()
    }

    /// 远端单字表优先，拿不到就用内建表；之后补上频率标签
    pub async fn load_vocabulary(&mut self) -> VocabularySource {
        let remote = self.store.fetch_vocabulary().await;
        let bundled = transfer::bundled_vocabulary();
        let (mut words, source) = if remote.is_empty() {
            tracing::info!("远端单字表为空，改用内建单字表");
            (bundled.clone(), VocabularySource::Bundled)
        } else {
            (remote, VocabularySource::Remote)
        };
        transfer::apply_core_tags(&mut words, &transfer::core_tags(), &bundled);
        tracing::info!(count = words.len(), ?source, "单字表载入完成");
        self.words = words;
        source
    }

    pub async fn login(&mut self, username: &str) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            anyhow::bail!("用户名称不能为空");
        }
        if self.tracker.username().is_some() {
            self.logout().await;
        }
        self.tracker.begin_session(username);

        let (mission, progress, stats, grammar) = tokio::join!(
            self.store.fetch_daily_mission(username),
            self.store.fetch_user_vocab_progress(username),
            self.store.fetch_family_stats(),
            self.store.fetch_grammar_map(username),
        );
        let legacy = self.store.fetch_user_progress(username).await;

        self.mission = mission;
        self.grammar = grammar.unwrap_or_default();
        self.tracker.set_family_stats(stats);
        self.tracker.finish_loading(legacy, progress);
        tracing::info!(username, "登入完成");
        Ok(())
    }

    pub async fn logout(&mut self) {
        if self.tracker.has_pending_save() && !self.tracker.flush().await {
            tracing::warn!("登出前的进度存档失败");
        }
        self.tracker.end_session();
        self.mission = None;
        self.grammar.clear();
    }

    pub fn mission_words(&self, kind: MissionKind) -> &[Word] {
        self.mission.as_ref().map(|m| m.words(kind)).unwrap_or(&[])
    }

    pub fn grammar_score(&self, unit: &str) -> Option<GrammarScore> {
        self.grammar.get(unit).copied()
    }

    pub async fn refresh_family_stats(&self) -> Option<FamilyStats> {
        self.tracker.refresh_family_stats().await
    }

    /// 本地只保留最高分和最多星数
    pub fn record_grammar_result(&mut self, unit: &str, score: u32, stars: u32) -> Option<SyncTask> {
        let username = self.tracker.username()?;
        let best = self.grammar.entry(unit.to_string()).or_default();
        best.highest_score = best.highest_score.max(score);
        best.stars = best.stars.max(stars);

        let store = Arc::clone(&self.store);
        let unit = unit.to_string();
        Some(SyncTask::spawn("saveGrammarResult", async move {
            store.save_grammar_result(&username, &unit, score, stars).await
        }))
    }

    pub fn find_word(&self, key: &str) -> Option<&Word> {
        let key = key.trim();
        self.words
            .iter()
            .find(|w| w.id == key)
            .or_else(|| self.words.iter().find(|w| w.term.eq_ignore_ascii_case(key)))
    }

    // 页码从 1 开始，第 0 页不存在
    fn page_words(&self, category: &str, page_number: usize) -> Vec<&Word> {
        match page_number.checked_sub(1) {
            Some(chunk) => catalog::select_page(&self.words, category, chunk, self.page_size),
            None => Vec::new(),
        }
    }

    /// 页码从 1 开始；越界时返回空
    pub fn page(&self, category: &str, page_number: usize, filter: FilterMode) -> Vec<&Word> {
        let words = self.page_words(category, page_number);
        let state = self.tracker.state_view();
        filter.apply(words, &state.marked_unfamiliar, &state.mistake_counts)
    }

    /// 不存在的页（第 0 页或越界）不记录完成状态
    pub fn complete_page(&self, category: &str, page_number: usize, force: Option<bool>) -> PageCompletion {
        let ids: Vec<String> = self
            .page_words(category, page_number)
            .iter()
            .map(|w| w.id.clone())
            .collect();
        if ids.is_empty() {
            return PageCompletion::Unchanged;
        }
        self.tracker.mark_page_complete(category, page_number, &ids, force)
    }

    /// 新增单字（需要等远端回传 id）
    pub async fn add_word(&mut self, mut word: Word) -> Result<&Word> {
        word.term = word.term.trim().to_string();
        if word.term.is_empty() {
            anyhow::bail!("单字不能为空");
        }
        if is_reserved_category(&word.category) {
            anyhow::bail!("分类名称「{}」为保留字，请换一个", word.category.trim());
        }
        if self.words.iter().any(|w| w.term.eq_ignore_ascii_case(&word.term)) {
            anyhow::bail!("单字「{}」已经存在", word.term);
        }
        word.category = category_of(&word).to_string();

        let id = self
            .store
            .add_word(&word)
            .await
            .map_err(|e| anyhow::anyhow!("新增单字失败: {}", e))?;
        word.id = id;
        tracing::info!(term = %word.term, id = %word.id, "新增单字");
        self.words.push(word);
        self.words.last().context("新增的单字不见了")
    }
}
