//! In-memory `RemoteStore` that records every call, for unit tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::*;
use crate::remote::{RemoteError, RemoteStore};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    FetchVocabulary,
    FetchUserProgress(String),
    SaveUserProgress(String, UserProgress),
    FetchVocabProgress(String),
    FetchDailyMission(String),
    FetchFamilyStats,
    FetchGrammarMap(String),
    UpdateWordStatus(String, bool),
    UpdateMistakeCount(String, u32),
    MarkWordsViewed(String, Vec<String>),
    SubmitSrs(String, String, SrsRating),
    SubmitQuiz(String, Vec<QuizResultSubmission>),
    SaveGrammarResult(String, String, u32, u32),
    AddWord(String),
}

#[derive(Default)]
pub struct FakeStore {
    pub calls: Mutex<Vec<Call>>,
    pub fail: AtomicBool,
    pub vocabulary: Mutex<Vec<Word>>,
    pub progress_map: Mutex<Option<ProgressMap>>,
    pub legacy: Mutex<Option<UserProgress>>,
    pub mission: Mutex<Option<DailyMission>>,
    pub grammar: Mutex<Option<GrammarMap>>,
}

impl FakeStore {
    pub fn failing() -> Self {
        let store = FakeStore::default();
        store.fail.store(true, Ordering::SeqCst);
        store
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) -> bool {
        self.calls.lock().unwrap().push(call);
        !self.fail.load(Ordering::SeqCst)
    }
}

impl RemoteStore for FakeStore {
    async fn fetch_vocabulary(&self) -> Vec<Word> {
        if self.record(Call::FetchVocabulary) {
            self.vocabulary.lock().unwrap().clone()
        } else {
            Vec::new()
        }
    }

    async fn fetch_user_progress(&self, username: &str) -> Option<UserProgress> {
        if self.record(Call::FetchUserProgress(username.to_string())) {
            self.legacy.lock().unwrap().clone()
        } else {
            None
        }
    }

    async fn save_user_progress(&self, username: &str, progress: &UserProgress) -> bool {
        self.record(Call::SaveUserProgress(username.to_string(), progress.clone()))
    }

    async fn fetch_user_vocab_progress(&self, username: &str) -> Option<ProgressMap> {
        if self.record(Call::FetchVocabProgress(username.to_string())) {
            self.progress_map.lock().unwrap().clone()
        } else {
            None
        }
    }

    async fn fetch_daily_mission(&self, username: &str) -> Option<DailyMission> {
        if self.record(Call::FetchDailyMission(username.to_string())) {
            self.mission.lock().unwrap().clone()
        } else {
            None
        }
    }

    async fn fetch_family_stats(&self) -> Option<FamilyStats> {
        if self.record(Call::FetchFamilyStats) {
            Some(FamilyStats::default())
        } else {
            None
        }
    }

    async fn fetch_grammar_map(&self, username: &str) -> Option<GrammarMap> {
        if self.record(Call::FetchGrammarMap(username.to_string())) {
            self.grammar.lock().unwrap().clone()
        } else {
            None
        }
    }

    async fn update_word_status(&self, word_id: &str, is_unfamiliar: bool) -> bool {
        self.record(Call::UpdateWordStatus(word_id.to_string(), is_unfamiliar))
    }

    async fn update_mistake_count(&self, word_id: &str, count: u32) -> bool {
        self.record(Call::UpdateMistakeCount(word_id.to_string(), count))
    }

    async fn mark_words_viewed(&self, username: &str, word_ids: &[String]) -> bool {
        self.record(Call::MarkWordsViewed(username.to_string(), word_ids.to_vec()))
    }

    async fn submit_srs_result(&self, username: &str, word_id: &str, rating: SrsRating) -> bool {
        self.record(Call::SubmitSrs(username.to_string(), word_id.to_string(), rating))
    }

    async fn submit_quiz_result(&self, username: &str, results: &[QuizResultSubmission]) -> bool {
        self.record(Call::SubmitQuiz(username.to_string(), results.to_vec()))
    }

    async fn save_grammar_result(&self, username: &str, unit: &str, score: u32, stars: u32) -> bool {
        self.record(Call::SaveGrammarResult(username.to_string(), unit.to_string(), score, stars))
    }

    async fn add_word(&self, word: &Word) -> Result<String, RemoteError> {
        if self.record(Call::AddWord(word.term.clone())) {
            Ok(format!("w-{}", word.term))
        } else {
            Err(RemoteError::Rejected("add failed".to_string()))
        }
    }
}
