use anyhow::Context;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::path::Path;

use crate::api::{AiError, ApiClient, RequestMessage};
use crate::config::AiConfig;
use crate::extract::extract_json;
use crate::models::{QuizQuestion, Word};

/// AI 自动补齐的单字资料；模型漏掉的字段保持空字串
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct WordDetails {
    pub part_of_speech: String,
    pub meaning: String,
    pub phonetic: String,
    pub example: String,
    pub example_translation: String,
    pub category: String,
    pub syllables: String,
}

impl WordDetails {
    /// 新字固定放在 1200 级
    pub fn into_word(self, term: &str) -> Word {
        Word {
            term: term.to_string(),
            part_of_speech: self.part_of_speech,
            meaning: self.meaning,
            phonetic: self.phonetic,
            example: self.example,
            example_translation: self.example_translation,
            category: self.category,
            level: "1200".to_string(),
            syllables: self.syllables,
            ..Default::default()
        }
    }

    /// 只覆盖模型确实给出的字段
    pub fn apply_to(&self, word: &mut Word) {
        let fields = [
            (&mut word.part_of_speech, &self.part_of_speech),
            (&mut word.meaning, &self.meaning),
            (&mut word.phonetic, &self.phonetic),
            (&mut word.example, &self.example),
            (&mut word.example_translation, &self.example_translation),
            (&mut word.category, &self.category),
            (&mut word.syllables, &self.syllables),
        ];
        for (target, value) in fields {
            if !value.trim().is_empty() {
                *target = value.trim().to_string();
            }
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ExampleSentence {
    pub sentence: String,
    pub translation: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MindMap {
    pub root: String,
    #[serde(default)]
    pub root_meaning: String,
    #[serde(default)]
    pub related_words: Vec<RelatedWord>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RelatedWord {
    pub word: String,
    #[serde(default)]
    pub meaning: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ArticleText {
    pub english: String,
    pub chinese: String,
}

/// 素材分析的结果：阅读文章或一组题目
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Analysis {
    Article { content: ArticleText },
    Quiz { questions: Vec<QuizQuestion> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuizPayload {
    Wrapped { questions: Vec<QuizQuestion> },
    Bare(Vec<QuizQuestion>),
}

impl From<QuizPayload> for Vec<QuizQuestion> {
    fn from(payload: QuizPayload) -> Self {
        match payload {
            QuizPayload::Wrapped { questions } | QuizPayload::Bare(questions) => questions,
        }
    }
}

/// 随题附上的图片，以 base64 data URL 内嵌发送
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read(path).with_context(|| format!("无法读取图片 {}", path.display()))?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let mime_type = match extension.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "pdf" => "application/pdf",
            other => anyhow::bail!("不支持的图片格式: {}", other),
        };
        Ok(InlineImage {
            mime_type: mime_type.to_string(),
            data,
        })
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }
}

pub struct Assistant {
    api_client: ApiClient,
}

impl Assistant {
    pub fn new(config: &AiConfig) -> anyhow::Result<Self> {
        Ok(Assistant {
            api_client: ApiClient::new(config)?,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.api_client.has_api_key()
    }

    async fn ask(&self, prompt: String) -> Result<String, AiError> {
        self.api_client.complete(vec![RequestMessage::user(prompt)], 0.4).await
    }

    pub async fn word_details(&self, term: &str) -> Result<WordDetails, AiError> {
        let prompt = format!(
            r#"
Provide details for the English word "{term}" for junior high students in Taiwan.
Return valid JSON only:
{{
  "partOfSpeech": "(n.) or (v.) etc.",
  "meaning": "Traditional Chinese definition",
  "phonetic": "KK or IPA",
  "example": "Simple sentence",
  "exampleTranslation": "Traditional Chinese translation",
  "category": "One category (e.g. 人物, 食物, 動作...)",
  "syllables": "word split by hyphen e.g. ap-ple"
}}
"#
        );
        extract_json(&self.ask(prompt).await?)
    }

    pub async fn example_sentence(&self, word: &Word) -> Result<ExampleSentence, AiError> {
        let prompt = format!(
            r#"
Create a simple example sentence for the word "{}" ({}, {}).
Output valid JSON only: {{ "sentence": "English sentence", "translation": "Traditional Chinese translation" }}
"#,
            word.term, word.part_of_speech, word.meaning
        );
        extract_json(&self.ask(prompt).await?)
    }

    pub async fn mind_map(&self, term: &str) -> Result<MindMap, AiError> {
        let prompt = format!(
            r#"
You are an English teacher for junior high students in Taiwan.
Create a word family and roots mind map for the English word "{term}".
Prefer derived words (act -> action, active, actor); otherwise common synonyms or antonyms.
Output valid JSON only:
{{
  "root": "{term}",
  "rootMeaning": "Traditional Chinese meaning",
  "relatedWords": [
    {{ "word": "related word", "meaning": "Traditional Chinese meaning" }}
  ]
}}
Provide exactly 4 related words.
"#
        );
        extract_json(&self.ask(prompt).await?)
    }

    /// 文法讲解，直接返回 markdown
    pub async fn grammar_lesson(&self, topic: &str) -> Result<String, AiError> {
        self.ask(format!(
            "Explain the grammar point \"{topic}\" for junior high students in Taiwan. \
             Use Traditional Chinese (繁體中文). Output in Markdown."
        ))
        .await
    }

    pub async fn grammar_quiz(&self, topic: &str) -> Result<Vec<QuizQuestion>, AiError> {
        let prompt = format!(
            r#"
Create 3 grammar multiple choice questions for the topic "{topic}".
Output valid JSON only:
{{
  "questions": [
    {{
      "question": "Question text",
      "options": ["A", "B", "C", "D"],
      "correctAnswerIndex": 0,
      "explanation": "Traditional Chinese explanation"
    }}
  ]
}}
"#
        );
        let payload: QuizPayload = extract_json(&self.ask(prompt).await?)?;
        let mut questions: Vec<QuizQuestion> = payload.into();
        for question in &mut questions {
            question.grammar_tag.get_or_insert_with(|| topic.to_string());
        }
        Ok(questions)
    }

    /// 判断贴上的文字 / 图片是文章还是题目，并翻译或解题
    pub async fn analyze_material(&self, text: &str, image: Option<&InlineImage>) -> Result<Analysis, AiError> {
        let instructions = r#"
Analyze the provided content (text or image).

Task 1: Decide whether it is mainly an article (reading passage, story, news) or a quiz (questions, exercises).

Task 2:
If it is an ARTICLE, translate the English text to Traditional Chinese and output:
{
  "type": "article",
  "content": { "english": "Full English text", "chinese": "Full Traditional Chinese translation" }
}

If it is a QUIZ, extract every question and output:
{
  "type": "quiz",
  "questions": [
    {
      "question": "Question text",
      "options": ["Option A", "Option B", "Option C", "Option D"],
      "correctAnswerIndex": 0,
      "explanation": "Explanation in Traditional Chinese",
      "grammarTag": "Grammar topic, or null for a vocabulary question",
      "wordTerm": "Target word for a vocabulary question, or null"
    }
  ]
}

IMPORTANT: Output ONLY valid JSON.
"#;
        let prompt = if text.trim().is_empty() {
            instructions.to_string()
        } else {
            format!("{}\n\n{}", text.trim(), instructions)
        };
        let message = match image {
            Some(image) => RequestMessage::user_with_image(prompt, image.data_url()),
            None => RequestMessage::user(prompt),
        };
        let raw = self.api_client.complete(vec![message], 0.2).await?;
        parse_analysis(&raw)
    }
}

fn parse_analysis(raw: &str) -> Result<Analysis, AiError> {
    let mut analysis: Analysis = extract_json(raw)?;
    if let Analysis::Quiz { questions } = &mut analysis {
        questions.retain(|q| !q.question.trim().is_empty() && !q.options.is_empty());
    }
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn word_details_fill_a_new_word() {
        let details: WordDetails = extract_json(
            r#"```json
{"partOfSpeech":"(n.)","meaning":"蘋果","phonetic":"/ˈæpl/","example":"I eat an apple.","exampleTranslation":"我吃一顆蘋果。","category":"食物","level":"2000","syllables":"ap-ple"}
```"#,
        )
        .unwrap();
        let word = details.into_word("apple");
        assert_eq!(word.term, "apple");
        assert_eq!(word.level, "1200");
        assert_eq!(word.category, "食物");
        assert!(word.id.is_empty());
    }

    #[test]
    fn blank_details_do_not_erase_existing_fields() {
        let mut word = Word {
            term: "kite".to_string(),
            meaning: "風箏".to_string(),
            category: "休閒".to_string(),
            ..Default::default()
        };
        let details = WordDetails {
            meaning: " ".to_string(),
            phonetic: "/kaɪt/".to_string(),
            ..Default::default()
        };
        details.apply_to(&mut word);
        assert_eq!(word.meaning, "風箏");
        assert_eq!(word.phonetic, "/kaɪt/");
        assert_eq!(word.category, "休閒");
    }

    #[test]
    fn analysis_is_either_article_or_quiz() {
        let article = parse_analysis(
            r#"Here is the result: {"type":"article","content":{"english":"Tom has a dog.","chinese":"湯姆有一隻狗。"}}"#,
        )
        .unwrap();
        assert_eq!(
            article,
            Analysis::Article {
                content: ArticleText {
                    english: "Tom has a dog.".to_string(),
                    chinese: "湯姆有一隻狗。".to_string(),
                }
            }
        );

        let quiz = parse_analysis(
            r#"{"type":"quiz","questions":[
                {"question":"He ___ to school yesterday.","options":["go","goes","went","going"],"correctAnswerIndex":2,"grammarTag":"Past Tense","wordTerm":null},
                {"question":"","options":[]}
            ]}"#,
        )
        .unwrap();
        match quiz {
            Analysis::Quiz { questions } => {
                assert_eq!(questions.len(), 1);
                assert_eq!(questions[0].correct_answer_index, 2);
                assert_eq!(questions[0].grammar_tag.as_deref(), Some("Past Tense"));
                assert!(questions[0].word_term.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_analysis_type_is_a_parse_failure() {
        assert!(matches!(
            parse_analysis(r#"{"type":"poem","lines":[]}"#),
            Err(AiError::ParseFailed(_))
        ));
    }

    #[test]
    fn quiz_payload_accepts_bare_arrays() {
        let payload: QuizPayload =
            extract_json(r#"[{"question":"Q","options":["a","b"],"correctAnswerIndex":1}]"#).unwrap();
        let questions: Vec<QuizQuestion> = payload.into();
        assert_eq!(questions[0].question, "Q");
    }

    #[test]
    fn images_become_data_urls() {
        let mut file = tempfile::Builder::new().suffix(".PNG").tempfile().unwrap();
        file.write_all(&[0x89, b'P', b'N', b'G']).unwrap();
        let image = InlineImage::from_path(file.path()).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_url(), "data:image/png;base64,iVBORw==");

        let text = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        assert!(InlineImage::from_path(text.path()).is_err());
    }
}
