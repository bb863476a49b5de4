//! Per-session review facts with optimistic local updates.
//!
//! Every user action changes local state synchronously and then hands the
//! remote write to a detached [`SyncTask`]. The task result is only logged;
//! local state is never rolled back. Values are always sent as absolute
//! totals or booleans, so calls that arrive out of order still converge on
//! last-write-wins.
//!
//! All methods that start tasks must run inside a Tokio runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::catalog::{ALL_CATEGORY, PageKey};
use crate::models::*;
use crate::remote::RemoteStore;

/// 一次后台远端写入；结果只用于日志，不会回滚本地状态
#[must_use = "drop the task to detach it, or await `finished` to observe it"]
pub struct SyncTask {
    action: &'static str,
    handle: JoinHandle<bool>,
}

impl SyncTask {
    pub(crate) fn spawn<F>(action: &'static str, work: F) -> Self
    where
        F: Future<Output = bool> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let ok = work.await;
            if !ok {
                tracing::warn!(action, "后台同步失败，本地状态领先于服务器");
            }
            ok
        });
        SyncTask { action, handle }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub async fn finished(self) -> bool {
        match self.handle.await {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!(action = self.action, error = %e, "后台任务中断");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewState {
    pub marked_unfamiliar: BTreeSet<String>,
    pub quiz_counts: BTreeMap<String, u32>,
    pub last_questions: BTreeMap<String, QuizQuestion>,
    pub mistake_questions: Vec<QuizQuestion>,
    pub mistake_counts: BTreeMap<String, u32>,
    pub completed_pages: BTreeSet<PageKey>,
    pub vocab_progress: ProgressMap,
}

impl ReviewState {
    fn restore(&mut self, legacy: UserProgress) {
        self.marked_unfamiliar = legacy.marked_unfamiliar.into_iter().collect();
        self.quiz_counts = legacy.quiz_counts;
        self.last_questions = legacy.last_questions;
        self.mistake_questions = legacy.mistake_questions;
        self.mistake_counts = legacy.mistake_counts;
        self.completed_pages = legacy.completed_pages.into_iter().map(PageKey::from).collect();
    }

    pub fn snapshot(&self) -> UserProgress {
        UserProgress {
            marked_unfamiliar: self.marked_unfamiliar.iter().cloned().collect(),
            quiz_counts: self.quiz_counts.clone(),
            last_questions: self.last_questions.clone(),
            mistake_questions: self.mistake_questions.clone(),
            mistake_counts: self.mistake_counts.clone(),
            completed_pages: self.completed_pages.iter().map(|k| k.to_string()).collect(),
        }
    }

    // 服务端刷新回来的记录：次数只取较大值，保证本次会话内不倒退；
    // 服务端还没有的本地记录原样保留
    fn merge_progress(&mut self, fresh: ProgressMap) {
        let mut merged = fresh;
        for (id, local) in std::mem::take(&mut self.vocab_progress) {
            match merged.get_mut(&id) {
                Some(entry) => {
                    entry.tested_count = entry.tested_count.max(local.tested_count);
                    entry.correct_count = entry.correct_count.max(local.correct_count);
                }
                None => {
                    merged.insert(id, local);
                }
            }
        }
        self.vocab_progress = merged;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordStatus {
    pub mastery: MasteryStatus,
    pub marked: bool,
}

pub enum PageCompletion {
    /// "All" 视图没有页码概念
    Ignored,
    Unchanged,
    Completed(Option<SyncTask>),
    Reopened,
}

impl PageCompletion {
    pub fn changed(&self) -> bool {
        matches!(self, PageCompletion::Completed(_) | PageCompletion::Reopened)
    }
}

pub struct QuizAnswer {
    pub correct: bool,
    pub mistake_sync: Option<SyncTask>,
}

struct Shared<S> {
    store: Arc<S>,
    state: Mutex<ReviewState>,
    user: Mutex<Option<String>>,
    family_stats: Mutex<Option<FamilyStats>>,
    loaded: AtomicBool,
    epoch: AtomicU64,
    debounce: Duration,
    pending_save: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: RemoteStore> Shared<S> {
    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn is_current(&self, epoch: u64) -> bool {
        if self.current_epoch() == epoch {
            true
        } else {
            tracing::debug!(epoch, "会话已切换，丢弃过期回应");
            false
        }
    }

    async fn refresh_progress(&self, username: &str, epoch: u64) {
        if let Some(fresh) = self.store.fetch_user_vocab_progress(username).await {
            if self.is_current(epoch) {
                lock(&self.state).merge_progress(fresh);
            }
        }
    }

    async fn refresh_family_stats(&self, epoch: u64) {
        let stats = self.store.fetch_family_stats().await;
        if stats.is_some() && self.is_current(epoch) {
            *lock(&self.family_stats) = stats;
        }
    }

    async fn save_now(&self, epoch: u64) -> bool {
        let Some(username) = lock(&self.user).clone() else {
            return false;
        };
        if !self.loaded.load(Ordering::SeqCst) || !self.is_current(epoch) {
            return false;
        }
        let snapshot = lock(&self.state).snapshot();
        self.store.save_user_progress(&username, &snapshot).await
    }
}

pub struct ReviewTracker<S: RemoteStore> {
    inner: Arc<Shared<S>>,
}

impl<S: RemoteStore> Clone for ReviewTracker<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RemoteStore> ReviewTracker<S> {
    pub fn new(store: Arc<S>, save_debounce: Duration) -> Self {
        ReviewTracker {
            inner: Arc::new(Shared {
                store,
                state: Mutex::new(ReviewState::default()),
                user: Mutex::new(None),
                family_stats: Mutex::new(None),
                loaded: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                debounce: save_debounce,
                pending_save: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReviewState> {
        lock(&self.inner.state)
    }

    pub fn username(&self) -> Option<String> {
        lock(&self.inner.user).clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::SeqCst)
    }

    /// 切换用户：清空本地状态，之前发出的刷新回应一律作废
    pub fn begin_session(&self, username: &str) {
        self.cancel_pending_save();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.loaded.store(false, Ordering::SeqCst);
        *self.state() = ReviewState::default();
        *lock(&self.inner.family_stats) = None;
        *lock(&self.inner.user) = Some(username.to_string());
    }

    /// 初始载入完成后才开始 debounce 存档
    pub fn finish_loading(&self, legacy: Option<UserProgress>, progress: Option<ProgressMap>) {
        if let Some(legacy) = legacy {
            self.restore(legacy);
        }
        if let Some(progress) = progress {
            self.replace_progress_map(progress);
        }
        self.inner.loaded.store(true, Ordering::SeqCst);
    }

    /// 用旧版整包进度覆盖本地集合，逐字进度表不动
    pub fn restore(&self, legacy: UserProgress) {
        self.state().restore(legacy);
    }

    pub fn end_session(&self) {
        self.cancel_pending_save();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.loaded.store(false, Ordering::SeqCst);
        *self.state() = ReviewState::default();
        *lock(&self.inner.family_stats) = None;
        *lock(&self.inner.user) = None;
    }

    pub fn replace_progress_map(&self, progress: ProgressMap) {
        self.state().vocab_progress = progress;
    }

    pub fn set_family_stats(&self, stats: Option<FamilyStats>) {
        *lock(&self.inner.family_stats) = stats;
    }

    pub fn family_stats(&self) -> Option<FamilyStats> {
        lock(&self.inner.family_stats).clone()
    }

    pub fn snapshot(&self) -> UserProgress {
        self.state().snapshot()
    }

    pub fn state_view(&self) -> ReviewState {
        self.state().clone()
    }

    pub fn is_marked(&self, word_id: &str) -> bool {
        self.state().marked_unfamiliar.contains(word_id)
    }

    pub fn mistake_count(&self, word_id: &str) -> u32 {
        self.state().mistake_counts.get(word_id).copied().unwrap_or(0)
    }

    pub fn quiz_count(&self, word_id: &str) -> u32 {
        self.state().quiz_counts.get(word_id).copied().unwrap_or(0)
    }

    pub fn progress(&self, word_id: &str) -> Option<UserVocabProgress> {
        self.state().vocab_progress.get(word_id).cloned()
    }

    pub fn is_page_complete(&self, category: &str, page_number: usize) -> bool {
        self.state()
            .completed_pages
            .contains(&PageKey::new(category, page_number))
    }

    pub fn mastery(&self, word_id: &str) -> WordStatus {
        let state = self.state();
        WordStatus {
            mastery: state
                .vocab_progress
                .get(word_id)
                .map(UserVocabProgress::mastery)
                .unwrap_or(MasteryStatus::Unseen),
            marked: state.marked_unfamiliar.contains(word_id),
        }
    }

    /// 星号：立即翻转本地标记，再把新的布尔值写回远端
    pub fn toggle_unfamiliar(&self, word_id: &str) -> SyncTask {
        let now_marked = {
            let mut state = self.state();
            if state.marked_unfamiliar.remove(word_id) {
                false
            } else {
                state.marked_unfamiliar.insert(word_id.to_string());
                true
            }
        };
        self.schedule_save();

        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        let id = word_id.to_string();
        SyncTask::spawn("updateWordStatus", async move {
            let ok = inner.store.update_word_status(&id, now_marked).await;
            inner.refresh_family_stats(epoch).await;
            ok
        })
    }

    /// 错误次数 +1，上传的是新的总数而不是增量
    pub fn record_mistake(&self, word_id: &str) -> (u32, SyncTask) {
        let count = {
            let mut state = self.state();
            let entry = state.mistake_counts.entry(word_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        self.schedule_save();

        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        let id = word_id.to_string();
        let task = SyncTask::spawn("updateWordMistakeCount", async move {
            let ok = inner.store.update_mistake_count(&id, count).await;
            inner.refresh_family_stats(epoch).await;
            ok
        });
        (count, task)
    }

    /// 标记一页读完。`force` 为 None 时翻转；已经是目标状态时什么也不做。
    /// 只有“变成完成”才会通知远端，取消完成只改本地。
    pub fn mark_page_complete(
        &self,
        category: &str,
        page_number: usize,
        word_ids: &[String],
        force: Option<bool>,
    ) -> PageCompletion {
        if category == ALL_CATEGORY {
            return PageCompletion::Ignored;
        }
        let key = PageKey::new(category, page_number);
        let username = self.username();

        let complete = {
            let mut state = self.state();
            let currently = state.completed_pages.contains(&key);
            let target = force.unwrap_or(!currently);
            if currently == target {
                return PageCompletion::Unchanged;
            }
            if target {
                state.completed_pages.insert(key);
            } else {
                state.completed_pages.remove(&key);
            }
            if username.is_some() {
                for id in word_ids {
                    match state.vocab_progress.get_mut(id) {
                        Some(existing) => existing.map_viewed = target,
                        None if target => {
                            state
                                .vocab_progress
                                .insert(id.clone(), UserVocabProgress::viewed_now());
                        }
                        None => {}
                    }
                }
            }
            target
        };
        self.schedule_save();

        if !complete {
            return PageCompletion::Reopened;
        }
        let Some(username) = username else {
            return PageCompletion::Completed(None);
        };
        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        let ids = word_ids.to_vec();
        PageCompletion::Completed(Some(SyncTask::spawn("markWordViewed", async move {
            let ok = inner.store.mark_words_viewed(&username, &ids).await;
            inner.refresh_family_stats(epoch).await;
            ok
        })))
    }

    /// SRS 自评：again 加入不熟、easy 移除；之后无论成败都重新拉取权威进度
    pub fn submit_srs_rating(&self, word_id: &str, rating: SrsRating) -> Option<SyncTask> {
        let username = self.username()?;
        match rating.marking_effect() {
            Some(true) => {
                self.state().marked_unfamiliar.insert(word_id.to_string());
            }
            Some(false) => {
                self.state().marked_unfamiliar.remove(word_id);
            }
            None => {}
        }
        self.schedule_save();

        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        let id = word_id.to_string();
        Some(SyncTask::spawn("submitSrsResult", async move {
            let ok = inner.store.submit_srs_result(&username, &id, rating).await;
            inner.refresh_progress(&username, epoch).await;
            inner.refresh_family_stats(epoch).await;
            ok
        }))
    }

    /// 记录一题作答。答错时保存题目并累计错误次数。
    pub fn record_quiz_answer(&self, question: &QuizQuestion, chosen: usize) -> QuizAnswer {
        let correct = chosen == question.correct_answer_index;
        let word_id = question.word_id.clone();
        {
            let mut state = self.state();
            *state.quiz_counts.entry(word_id.clone()).or_insert(0) += 1;
            state.last_questions.insert(word_id.clone(), question.clone());
            let entry = state.vocab_progress.entry(word_id.clone()).or_default();
            entry.tested_count += 1;
            if correct {
                entry.correct_count += 1;
            }
            if !correct && !state.mistake_questions.iter().any(|q| q.question == question.question) {
                state.mistake_questions.insert(0, question.clone());
            }
        }

        let mistake_sync = if correct {
            self.schedule_save();
            None
        } else {
            Some(self.record_mistake(&word_id).1)
        };
        QuizAnswer { correct, mistake_sync }
    }

    /// 整轮测验结束：上传结果后刷新进度与排行榜
    pub fn complete_quiz(&self, results: Vec<QuizResultSubmission>) -> Option<SyncTask> {
        let username = self.username()?;
        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        Some(SyncTask::spawn("submitQuizResult", async move {
            let ok = inner.store.submit_quiz_result(&username, &results).await;
            inner.refresh_progress(&username, epoch).await;
            inner.refresh_family_stats(epoch).await;
            ok
        }))
    }

    pub async fn refresh_family_stats(&self) -> Option<FamilyStats> {
        let epoch = self.inner.current_epoch();
        self.inner.refresh_family_stats(epoch).await;
        self.family_stats()
    }

    fn cancel_pending_save(&self) {
        if let Some(handle) = lock(&self.inner.pending_save).take() {
            handle.abort();
        }
    }

    /// 尾随 debounce：每次变动重置计时器，安静一段时间后才整包上传
    fn schedule_save(&self) {
        if self.username().is_none() || !self.is_loaded() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let epoch = inner.current_epoch();
        let delay = inner.debounce;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !inner.save_now(epoch).await {
                tracing::warn!("进度存档失败");
            }
        });
        if let Some(previous) = lock(&self.inner.pending_save).replace(handle) {
            previous.abort();
        }
    }

    pub fn has_pending_save(&self) -> bool {
        lock(&self.inner.pending_save)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// 取消计时器并立即存档（退出前调用）
    pub async fn flush(&self) -> bool {
        self.cancel_pending_save();
        let epoch = self.inner.current_epoch();
        self.inner.save_now(epoch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FakeStore};

    fn tracker(store: &Arc<FakeStore>) -> ReviewTracker<FakeStore> {
        ReviewTracker::new(Arc::clone(store), Duration::from_millis(2000))
    }

    fn logged_in(store: &Arc<FakeStore>) -> ReviewTracker<FakeStore> {
        let tracker = tracker(store);
        tracker.begin_session("kid");
        tracker.finish_loading(None, None);
        tracker
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{}", i)).collect()
    }

    fn question(word_id: &str, text: &str) -> QuizQuestion {
        QuizQuestion {
            word_id: word_id.to_string(),
            question: text.to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer_index: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn toggle_sends_absolute_flag_and_keeps_local_state_on_failure() {
        let store = Arc::new(FakeStore::failing());
        let tracker = tracker(&store);

        assert!(!tracker.toggle_unfamiliar("w1").finished().await);
        assert!(tracker.is_marked("w1"));
        tracker.toggle_unfamiliar("w1").finished().await;
        assert!(!tracker.is_marked("w1"));

        let statuses: Vec<Call> = store
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::UpdateWordStatus(..)))
            .collect();
        assert_eq!(
            statuses,
            vec![
                Call::UpdateWordStatus("w1".into(), true),
                Call::UpdateWordStatus("w1".into(), false),
            ]
        );
    }

    #[tokio::test]
    async fn mistakes_are_sent_as_running_totals() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);

        let (first, task) = tracker.record_mistake("w7");
        task.finished().await;
        let (second, task) = tracker.record_mistake("w7");
        task.finished().await;

        assert_eq!((first, second), (1, 2));
        assert_eq!(tracker.mistake_count("w7"), 2);
        assert_eq!(store.count(|c| *c == Call::UpdateMistakeCount("w7".into(), 1)), 1);
        assert_eq!(store.count(|c| *c == Call::UpdateMistakeCount("w7".into(), 2)), 1);
    }

    #[tokio::test]
    async fn forcing_completion_twice_calls_remote_once() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);
        let words = ids(3);

        match tracker.mark_page_complete("Animals", 1, &words, Some(true)) {
            PageCompletion::Completed(Some(task)) => assert!(task.finished().await),
            _ => panic!("expected completion"),
        }
        let after_first = tracker.state_view();
        assert!(matches!(
            tracker.mark_page_complete("Animals", 1, &words, Some(true)),
            PageCompletion::Unchanged
        ));

        assert!(tracker.is_page_complete("Animals", 1));
        assert_eq!(tracker.state_view().completed_pages, after_first.completed_pages);
        assert_eq!(store.count(|c| matches!(c, Call::MarkWordsViewed(..))), 1);
        for id in &words {
            assert_eq!(tracker.mastery(id).mastery, MasteryStatus::Viewed);
        }
    }

    #[tokio::test]
    async fn completion_keeps_existing_progress_fields() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        tracker.begin_session("kid");
        let mut map = ProgressMap::new();
        map.insert(
            "w0".to_string(),
            UserVocabProgress {
                tested_count: 4,
                correct_count: 3,
                next_review_date: "2026-11-01".into(),
                ..Default::default()
            },
        );
        tracker.finish_loading(None, Some(map));

        let _ = tracker.mark_page_complete("Animals", 2, &ids(2), None);
        let kept = tracker.progress("w0").unwrap();
        assert!(kept.map_viewed);
        assert_eq!((kept.tested_count, kept.correct_count), (4, 3));
        assert_eq!(kept.next_review_date, "2026-11-01");
        let fresh = tracker.progress("w1").unwrap();
        assert!(fresh.map_viewed);
        assert_eq!((fresh.tested_count, fresh.correct_count), (0, 0));
    }

    #[tokio::test]
    async fn reopening_a_page_is_local_only() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);
        let words = ids(2);

        if let PageCompletion::Completed(Some(task)) = tracker.mark_page_complete("人物", 1, &words, None) {
            task.finished().await;
        }
        assert!(matches!(
            tracker.mark_page_complete("人物", 1, &words, None),
            PageCompletion::Reopened
        ));
        assert!(!tracker.is_page_complete("人物", 1));
        assert_eq!(store.count(|c| matches!(c, Call::MarkWordsViewed(..))), 1);
    }

    #[tokio::test]
    async fn all_view_and_anonymous_completion() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        assert!(matches!(
            tracker.mark_page_complete(ALL_CATEGORY, 1, &ids(1), Some(true)),
            PageCompletion::Ignored
        ));
        assert!(matches!(
            tracker.mark_page_complete("人物", 1, &ids(1), Some(true)),
            PageCompletion::Completed(None)
        ));
        assert!(tracker.is_page_complete("人物", 1));
        assert!(tracker.progress("w0").is_none());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn srs_rating_marks_and_always_refreshes() {
        let store = Arc::new(FakeStore::failing());
        let tracker = logged_in(&store);

        let task = tracker.submit_srs_rating("w1", SrsRating::Again).unwrap();
        assert!(tracker.is_marked("w1"));
        assert!(!task.finished().await);
        let calls = store.calls();
        let submit = calls
            .iter()
            .position(|c| *c == Call::SubmitSrs("kid".into(), "w1".into(), SrsRating::Again))
            .unwrap();
        let refresh = calls
            .iter()
            .position(|c| *c == Call::FetchVocabProgress("kid".into()))
            .unwrap();
        assert!(submit < refresh);

        for rating in [SrsRating::Hard, SrsRating::Good] {
            tracker.submit_srs_rating("w1", rating).unwrap().finished().await;
            assert!(tracker.is_marked("w1"));
        }
        tracker.submit_srs_rating("w1", SrsRating::Easy).unwrap().finished().await;
        assert!(!tracker.is_marked("w1"));
        for rating in [SrsRating::Hard, SrsRating::Good] {
            tracker.submit_srs_rating("w1", rating).unwrap().finished().await;
            assert!(!tracker.is_marked("w1"));
        }
    }

    #[tokio::test]
    async fn srs_rating_needs_a_user() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        assert!(tracker.submit_srs_rating("w1", SrsRating::Again).is_none());
        assert!(!tracker.is_marked("w1"));
    }

    #[tokio::test]
    async fn correct_count_never_goes_down() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);
        let q = question("w1", "I ___ a kite.");

        assert!(tracker.record_quiz_answer(&q, 2).correct);
        assert!(tracker.record_quiz_answer(&q, 2).correct);
        let wrong = tracker.record_quiz_answer(&q, 0);
        assert!(!wrong.correct);
        wrong.mistake_sync.unwrap().finished().await;
        assert_eq!(tracker.progress("w1").unwrap().correct_count, 2);
        assert_eq!(tracker.mastery("w1").mastery, MasteryStatus::Mastered);

        // 服务器还没算进这几次作答
        let mut stale = ProgressMap::new();
        stale.insert("w1".into(), UserVocabProgress { correct_count: 1, tested_count: 1, ..Default::default() });
        *store.progress_map.lock().unwrap() = Some(stale);
        tracker
            .complete_quiz(vec![QuizResultSubmission { word_id: "w1".into(), is_correct: false }])
            .unwrap()
            .finished()
            .await;

        let progress = tracker.progress("w1").unwrap();
        assert_eq!(progress.correct_count, 2);
        assert_eq!(progress.tested_count, 3);
    }

    #[tokio::test]
    async fn local_records_survive_a_refresh_that_omits_them() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);
        let q = question("w1", "She ___ to school.");
        tracker.record_quiz_answer(&q, 2);
        tracker.record_quiz_answer(&q, 2);
        if let PageCompletion::Completed(Some(task)) = tracker.mark_page_complete("人物", 1, &ids(1), None) {
            task.finished().await;
        }

        // 服务器回传空表
        *store.progress_map.lock().unwrap() = Some(ProgressMap::new());
        tracker.submit_srs_rating("w1", SrsRating::Good).unwrap().finished().await;

        let progress = tracker.progress("w1").unwrap();
        assert_eq!((progress.tested_count, progress.correct_count), (2, 2));
        assert_eq!(tracker.mastery("w1").mastery, MasteryStatus::Mastered);
        assert_eq!(tracker.mastery("w0").mastery, MasteryStatus::Viewed);
    }

    #[tokio::test]
    async fn wrong_answers_keep_one_copy_of_each_question() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        let q1 = question("w1", "first");
        let q2 = question("w2", "second");

        for q in [&q1, &q2, &q1] {
            if let Some(task) = tracker.record_quiz_answer(q, 0).mistake_sync {
                task.finished().await;
            }
        }
        let state = tracker.state_view();
        let texts: Vec<&str> = state.mistake_questions.iter().map(|q| q.question.as_str()).collect();
        assert_eq!(texts, vec!["second", "first"]);
        assert_eq!(tracker.mistake_count("w1"), 2);
        assert_eq!(tracker.quiz_count("w1"), 2);
        assert_eq!(state.last_questions["w2"].question, "second");
    }

    #[tokio::test]
    async fn stale_refresh_is_dropped_after_switching_user() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);
        let mut map = ProgressMap::new();
        map.insert("w9".into(), UserVocabProgress { correct_count: 5, ..Default::default() });
        *store.progress_map.lock().unwrap() = Some(map);

        let task = tracker.submit_srs_rating("w9", SrsRating::Good).unwrap();
        tracker.begin_session("sibling");
        task.finished().await;

        assert!(tracker.progress("w9").is_none());
        assert_eq!(tracker.username().as_deref(), Some("sibling"));
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_save_is_debounced_to_the_final_state() {
        let store = Arc::new(FakeStore::default());
        let tracker = logged_in(&store);

        let _ = tracker.toggle_unfamiliar("w1");
        assert!(tracker.has_pending_save());
        tokio::time::sleep(Duration::from_millis(500)).await;
        let _ = tracker.record_mistake("w2");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let _ = tracker.toggle_unfamiliar("w3");
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(store.count(|c| matches!(c, Call::SaveUserProgress(..))), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let saves: Vec<UserProgress> = store
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SaveUserProgress(user, progress) if user == "kid" => Some(progress),
                _ => None,
            })
            .collect();
        assert_eq!(saves.len(), 1);
        assert!(!tracker.has_pending_save());
        assert_eq!(saves[0].marked_unfamiliar, vec!["w1", "w3"]);
        assert_eq!(saves[0].mistake_counts.get("w2"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn no_bulk_save_before_login_or_initial_load() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        let _ = tracker.toggle_unfamiliar("w1");
        tracker.begin_session("kid");
        let _ = tracker.toggle_unfamiliar("w2");
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(store.count(|c| matches!(c, Call::SaveUserProgress(..))), 0);
        assert!(!tracker.flush().await);
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_restore() {
        let store = Arc::new(FakeStore::default());
        let tracker = tracker(&store);
        tracker.begin_session("kid");
        let legacy = UserProgress {
            marked_unfamiliar: vec!["b".into(), "a".into()],
            completed_pages: vec!["人物-1".into()],
            mistake_counts: [("a".to_string(), 3)].into(),
            ..Default::default()
        };
        tracker.finish_loading(Some(legacy), None);

        assert!(tracker.is_page_complete("人物", 1));
        assert_eq!(tracker.mistake_count("a"), 3);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.marked_unfamiliar, vec!["a", "b"]);
        assert!(tracker.flush().await);
        assert_eq!(store.count(|c| matches!(c, Call::SaveUserProgress(..))), 1);
    }
}
