//! Client for the spreadsheet-backed Apps Script store.
//!
//! Every request is keyed by an `action` string. Reads are GET with query
//! parameters, writes are POST with a JSON body sent as `text/plain` (the
//! backend rejects CORS preflights). A non-JSON answer usually means the
//! deployment redirected to a Google sign-in page, so it is reported the same
//! way as a network failure.

use std::future::Future;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::RemoteConfig;
use crate::models::*;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("未设定 Google Apps Script 网址")]
    NotConfigured,
    #[error("网络请求失败: {0}")]
    Network(#[from] reqwest::Error),
    #[error("服务器回应错误 (状态码: {0})")]
    Status(u16),
    #[error("服务器回传格式错误 (非 JSON): {0}")]
    NotJson(String),
    #[error("权限不足：请确认 Apps Script 部署设定为「任何人 (Anyone)」")]
    PermissionDenied,
    #[error("服务器错误: {0}")]
    Rejected(String),
    #[error("回传内容解析失败: {0}")]
    Decode(#[from] serde_json::Error),
}

/// 复习追踪器和会话用到的远端操作。被动同步全部是尽力而为：失败只记日志，
/// 返回 `false` / `None`。
pub trait RemoteStore: Send + Sync + 'static {
    fn fetch_vocabulary(&self) -> impl Future<Output = Vec<Word>> + Send;

    fn fetch_user_progress(&self, username: &str) -> impl Future<Output = Option<UserProgress>> + Send;

    fn save_user_progress(&self, username: &str, progress: &UserProgress) -> impl Future<Output = bool> + Send;

    fn fetch_user_vocab_progress(&self, username: &str) -> impl Future<Output = Option<ProgressMap>> + Send;

    fn fetch_daily_mission(&self, username: &str) -> impl Future<Output = Option<DailyMission>> + Send;

    fn fetch_family_stats(&self) -> impl Future<Output = Option<FamilyStats>> + Send;

    fn fetch_grammar_map(&self, username: &str) -> impl Future<Output = Option<GrammarMap>> + Send;

    fn update_word_status(&self, word_id: &str, is_unfamiliar: bool) -> impl Future<Output = bool> + Send;

    fn update_mistake_count(&self, word_id: &str, count: u32) -> impl Future<Output = bool> + Send;

    fn mark_words_viewed(&self, username: &str, word_ids: &[String]) -> impl Future<Output = bool> + Send;

    fn submit_srs_result(&self, username: &str, word_id: &str, rating: SrsRating) -> impl Future<Output = bool> + Send;

    fn submit_quiz_result(
        &self,
        username: &str,
        results: &[QuizResultSubmission],
    ) -> impl Future<Output = bool> + Send;

    fn save_grammar_result(
        &self,
        username: &str,
        unit: &str,
        score: u32,
        stars: u32,
    ) -> impl Future<Output = bool> + Send;

    fn add_word(&self, word: &Word) -> impl Future<Output = Result<String, RemoteError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    pub count: Option<usize>,
}

pub struct GasClient {
    client: Client,
    base_url: Option<String>,
    timeout: Duration,
    long_timeout: Duration,
}

impl GasClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let client = ClientBuilder::new().build()?;
        Ok(GasClient {
            client,
            base_url: config.url.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            long_timeout: Duration::from_secs(config.long_timeout_seconds),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    fn url(&self) -> Result<&str, RemoteError> {
        self.base_url.as_deref().ok_or(RemoteError::NotConfigured)
    }

    // GET ?action=...&_t=<millis>，时间戳防止缓存
    async fn get_action<T: DeserializeOwned>(&self, action: &str, params: &[(&str, &str)]) -> Result<T, RemoteError> {
        let url = self.url()?;
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        let mut query: Vec<(&str, &str)> = vec![("action", action)];
        query.extend_from_slice(params);
        query.push(("_t", stamp.as_str()));

        let response = self
            .client
            .get(url)
            .query(&query)
            .timeout(self.timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        decode_json(response).await
    }

    async fn post_action(&self, payload: Value, timeout: Duration) -> Result<Value, RemoteError> {
        let url = self.url()?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "text/plain;charset=utf-8")
            .body(payload.to_string())
            .timeout(timeout)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        let body: Value = decode_json(response).await?;
        check_status(body)
    }

    // 被动同步：失败只记录日志
    async fn post_quietly(&self, action: &str, payload: Value) -> bool {
        if !self.is_configured() {
            tracing::debug!(action, "远端未配置，跳过");
            return false;
        }
        match self.post_action(payload, self.timeout).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(action, error = %e, "远端同步失败");
                false
            }
        }
    }

    async fn get_quietly<T: DeserializeOwned>(&self, action: &str, params: &[(&str, &str)]) -> Option<T> {
        if !self.is_configured() {
            tracing::debug!(action, "远端未配置，跳过");
            return None;
        }
        match self.get_action(action, params).await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(action, error = %e, "远端读取失败");
                None
            }
        }
    }

    /// 测试连接：网址必须以 /exec 结尾，且 getVocabulary 回传 JSON 数组
    pub async fn test_connection(&self, url: &str) -> ConnectionReport {
        let report = |success: bool, message: String, count: Option<usize>| ConnectionReport {
            success,
            message,
            count,
        };
        let url = url.trim();
        if url.is_empty() {
            return report(false, "网址为空".to_string(), None);
        }
        if !url.ends_with("/exec") {
            return report(false, "网址结尾必须是 /exec".to_string(), None);
        }

        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .get(url)
            .query(&[("action", "getVocabulary"), ("_t", stamp.as_str())])
            .timeout(Duration::from_secs(15))
            .send()
            .await;
        let response = match response {
            Ok(response) => response,
            Err(e) => return report(false, format!("连线失败 ({})", e), None),
        };
        if !response.status().is_success() {
            return report(false, format!("服务器回应错误 (Status: {})", response.status().as_u16()), None);
        }
        match decode_json::<Value>(response).await {
            Ok(Value::Array(items)) => report(true, "连线成功！".to_string(), Some(items.len())),
            Ok(_) => report(false, "连线成功，但回传格式非数组 (可能是空的)".to_string(), None),
            Err(RemoteError::NotJson(_)) | Err(RemoteError::PermissionDenied) => report(
                false,
                "权限错误：服务器回传了网页而非资料，「谁可以存取」必须是「任何人 (Anyone)」".to_string(),
                None,
            ),
            Err(e) => report(false, e.to_string(), None),
        }
    }

    pub async fn fetch_questions(&self) -> Option<std::collections::HashMap<String, Vec<QuizQuestion>>> {
        self.get_quietly("getQuestions", &[]).await
    }

    pub async fn fetch_grammar_questions(&self, unit: &str) -> Option<Vec<QuizQuestion>> {
        self.get_quietly("getGrammarQuestions", &[("unit", unit)]).await
    }

    pub async fn fetch_articles(&self) -> Vec<Article> {
        self.get_quietly("getArticles", &[]).await.unwrap_or_default()
    }

    pub async fn save_article(&self, article: &Article) -> bool {
        self.post_quietly("saveArticle", json!({ "action": "saveArticle", "article": article }))
            .await
    }

    pub async fn mark_article_read(&self, username: &str, article_id: &str) -> bool {
        self.post_quietly(
            "markArticleRead",
            json!({ "action": "markArticleRead", "username": username, "articleId": article_id }),
        )
        .await
    }

    pub async fn update_word_example(&self, word_id: &str, example: &str, translation: &str) -> bool {
        self.post_quietly(
            "updateWordExample",
            json!({
                "action": "updateWordExample",
                "wordId": word_id,
                "example": example,
                "translation": translation,
            }),
        )
        .await
    }

    pub async fn update_word_details(&self, word_id: &str, word: &Word) -> Result<(), RemoteError> {
        self.post_action(
            json!({ "action": "updateWordDetails", "wordId": word_id, "word": word }),
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    /// 批量更新例句，返回后端报告的更新笔数
    pub async fn update_word_example_batch(&self, updates: &[ExampleUpdate]) -> Result<u64, RemoteError> {
        let body = self
            .post_action(
                json!({ "action": "updateWordExampleBatch", "updates": updates }),
                self.long_timeout,
            )
            .await?;
        Ok(count_field(&body, "updated"))
    }

    pub async fn update_word_categories(&self, updates: &[CategoryUpdate]) -> Result<u64, RemoteError> {
        let body = self
            .post_action(
                json!({ "action": "updateWordCategoryBatch", "updates": updates }),
                self.long_timeout,
            )
            .await?;
        Ok(count_field(&body, "updated"))
    }

    pub async fn upload_vocabulary(&self, words: &[Word]) -> Result<u64, RemoteError> {
        let body = self
            .post_action(
                json!({ "action": "uploadVocabulary", "words": words }),
                self.long_timeout,
            )
            .await?;
        Ok(count_field(&body, "added"))
    }

    pub async fn clear_vocabulary(&self) -> Result<(), RemoteError> {
        self.post_action(json!({ "action": "clearVocabulary" }), Duration::from_secs(15))
            .await
            .map(|_| ())
    }

    pub async fn remove_duplicate_words(&self) -> Result<u64, RemoteError> {
        let body = self
            .post_action(json!({ "action": "removeDuplicateWords" }), self.timeout)
            .await?;
        Ok(count_field(&body, "removed"))
    }

    pub async fn save_questions(&self, questions: &[QuizQuestion]) -> Result<String, RemoteError> {
        let body = self
            .post_action(
                json!({ "action": "saveQuestions", "questions": questions }),
                self.long_timeout,
            )
            .await?;
        Ok(body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("上传成功")
            .to_string())
    }

    pub async fn sync_questions(&self, username: &str, questions: &[QuizQuestion]) -> bool {
        self.post_quietly(
            "syncQuestions",
            json!({ "action": "syncQuestions", "username": username, "questions": questions }),
        )
        .await
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ExampleUpdate {
    pub id: String,
    pub example: String,
    pub translation: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CategoryUpdate {
    pub id: String,
    pub category: String,
}

impl RemoteStore for GasClient {
    async fn fetch_vocabulary(&self) -> Vec<Word> {
        if !self.is_configured() {
            return Vec::new();
        }
        // 冷启动时第一次常常超时，重试一次
        for attempt in 1..=2 {
            match self.get_action::<Vec<Word>>("getVocabulary", &[]).await {
                Ok(words) => return words,
                Err(e) if attempt == 1 => tracing::warn!(error = %e, "读取单字失败，重试中"),
                Err(e) => tracing::error!(error = %e, "读取单字失败"),
            }
        }
        Vec::new()
    }

    async fn fetch_user_progress(&self, username: &str) -> Option<UserProgress> {
        self.get_quietly("getUserProgress", &[("userId", username)]).await
    }

    async fn save_user_progress(&self, username: &str, progress: &UserProgress) -> bool {
        self.post_quietly(
            "saveUserProgress",
            json!({ "action": "saveUserProgress", "userId": username, "data": progress }),
        )
        .await
    }

    async fn fetch_user_vocab_progress(&self, username: &str) -> Option<ProgressMap> {
        self.get_quietly("getUserVocabProgress", &[("username", username)]).await
    }

    async fn fetch_daily_mission(&self, username: &str) -> Option<DailyMission> {
        self.get_quietly("getDailyMission", &[("username", username)]).await
    }

    async fn fetch_family_stats(&self) -> Option<FamilyStats> {
        // leaderboard 缺失时整体反序列化失败，视同不可用
        self.get_quietly("getFamilyStats", &[]).await
    }

    async fn fetch_grammar_map(&self, username: &str) -> Option<GrammarMap> {
        self.get_quietly("getGrammarMap", &[("username", username)]).await
    }

    async fn update_word_status(&self, word_id: &str, is_unfamiliar: bool) -> bool {
        self.post_quietly(
            "updateWordStatus",
            json!({ "action": "updateWordStatus", "wordId": word_id, "isUnfamiliar": is_unfamiliar }),
        )
        .await
    }

    async fn update_mistake_count(&self, word_id: &str, count: u32) -> bool {
        self.post_quietly(
            "updateWordMistakeCount",
            json!({ "action": "updateWordMistakeCount", "wordId": word_id, "count": count }),
        )
        .await
    }

    async fn mark_words_viewed(&self, username: &str, word_ids: &[String]) -> bool {
        self.post_quietly(
            "markWordViewed",
            json!({ "action": "markWordViewed", "username": username, "wordIds": word_ids }),
        )
        .await
    }

    async fn submit_srs_result(&self, username: &str, word_id: &str, rating: SrsRating) -> bool {
        self.post_quietly(
            "submitSrsResult",
            json!({
                "action": "submitSrsResult",
                "username": username,
                "wordId": word_id,
                "rating": rating,
            }),
        )
        .await
    }

    async fn submit_quiz_result(&self, username: &str, results: &[QuizResultSubmission]) -> bool {
        self.post_quietly(
            "submitQuizResult",
            json!({ "action": "submitQuizResult", "username": username, "results": results }),
        )
        .await
    }

    async fn save_grammar_result(&self, username: &str, unit: &str, score: u32, stars: u32) -> bool {
        self.post_quietly(
            "saveGrammarResult",
            json!({
                "action": "saveGrammarResult",
                "username": username,
                "unit": unit,
                "score": score,
                "stars": stars,
            }),
        )
        .await
    }

    async fn add_word(&self, word: &Word) -> Result<String, RemoteError> {
        let body = self
            .post_action(json!({ "action": "addWord", "word": word }), self.timeout)
            .await?;
        Ok(match body.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => String::new(),
        })
    }
}

pub fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.contains("application/json"))
}

fn looks_like_sign_in(text: &str) -> bool {
    text.contains("Google Accounts") || text.contains("signin")
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let text = response.text().await?;
    if !is_json_content_type(content_type.as_deref()) {
        return Err(classify_non_json(&text));
    }
    Ok(serde_json::from_str(&text)?)
}

fn classify_non_json(text: &str) -> RemoteError {
    if looks_like_sign_in(text) {
        RemoteError::PermissionDenied
    } else {
        RemoteError::NotJson(text.chars().take(50).collect())
    }
}

// 写操作统一回传 {"status": "success" | "error", "message": ...}
fn check_status(body: Value) -> Result<Value, RemoteError> {
    match body.get("status").and_then(Value::as_str) {
        Some("success") => Ok(body),
        _ => Err(RemoteError::Rejected(
            body.get("message")
                .and_then(Value::as_str)
                .unwrap_or("服务器回传未知的错误")
                .to_string(),
        )),
    }
}

fn count_field(body: &Value, field: &str) -> u64 {
    body.get(field).and_then(Value::as_u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type(Some("application/json; charset=utf-8")));
        assert!(!is_json_content_type(Some("text/html; charset=UTF-8")));
        assert!(!is_json_content_type(None));
    }

    #[test]
    fn html_sign_in_page_is_a_permission_problem() {
        let page = "<html><title>Sign in - Google Accounts</title></html>";
        assert!(matches!(classify_non_json(page), RemoteError::PermissionDenied));
        match classify_non_json("<html>oops</html>") {
            RemoteError::NotJson(head) => assert_eq!(head, "<html>oops</html>"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn write_status_is_checked() {
        assert!(check_status(json!({"status": "success", "added": 3})).is_ok());
        match check_status(json!({"status": "error", "message": "Unknown action"})) {
            Err(RemoteError::Rejected(msg)) => assert_eq!(msg, "Unknown action"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(check_status(json!({})).is_err());
        assert_eq!(count_field(&json!({"added": 3}), "added"), 3);
        assert_eq!(count_field(&json!({}), "added"), 0);
    }

    #[tokio::test]
    async fn unconfigured_client_is_a_silent_no_op() {
        let client = GasClient::new(&RemoteConfig::default()).unwrap();
        assert!(!client.is_configured());
        assert!(client.fetch_vocabulary().await.is_empty());
        assert!(!client.update_word_status("w1", true).await);
        assert!(client.fetch_user_vocab_progress("kid").await.is_none());
        assert!(matches!(client.add_word(&Word::default()).await, Err(RemoteError::NotConfigured)));
    }

    #[tokio::test]
    async fn connection_test_validates_url_shape() {
        let client = GasClient::new(&RemoteConfig::default()).unwrap();
        assert!(!client.test_connection("").await.success);
        let report = client.test_connection("https://script.google.com/macros/s/x/edit").await;
        assert!(!report.success);
        assert!(report.message.contains("/exec"));
    }

    #[test]
    fn family_stats_without_leaderboard_is_rejected() {
        assert!(serde_json::from_value::<FamilyStats>(json!({"familyProgress": {}})).is_err());
        let stats: FamilyStats = serde_json::from_value(json!({"leaderboard": []})).unwrap();
        assert!(stats.leaderboard.is_empty());
    }
}
