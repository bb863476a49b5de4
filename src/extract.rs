//! AI 回应常夹带寒暄文字或 markdown 代码块，这里尽量把 JSON 抠出来。

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::api::AiError;

const FENCE_PATTERN: &str = r"(?s)```(?:json|JSON)?\s*(.*?)```";

fn fenced_body(text: &str) -> Option<&str> {
    let re = Regex::new(FENCE_PATTERN).ok()?;
    re.captures(text).and_then(|caps| caps.get(1)).map(|m| m.as_str())
}

/// 取出候选 JSON 片段：先剥代码块，再从第一个 `{`/`[` 截到最后一个 `}`/`]`
pub fn json_slice(text: &str) -> &str {
    let inner = fenced_body(text).unwrap_or(text);

    let start = inner.find(['{', '[']);
    let end = inner.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end >= start => &inner[start..=end],
        _ => inner.trim(),
    }
}

pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, AiError> {
    let candidate = json_slice(text);
    serde_json::from_str(candidate).map_err(|e| {
        tracing::debug!(raw = text, "无法从 AI 回应中解析 JSON");
        AiError::ParseFailed(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Example {
        sentence: String,
        translation: String,
    }

    #[test]
    fn tolerates_wrapper_text_and_fences() {
        let raw = "Sure! Here you go:\n```json\n{\"sentence\": \"I like {cats}.\", \"translation\": \"我喜歡貓。\"}\n```\nHope it helps.";
        let parsed: Example = extract_json(raw).unwrap();
        assert_eq!(parsed.sentence, "I like {cats}.");

        let bare = "結果如下 {\"sentence\":\"Hi.\",\"translation\":\"嗨。\"} 以上";
        let parsed: Example = extract_json(bare).unwrap();
        assert_eq!(parsed.translation, "嗨。");
    }

    #[test]
    fn arrays_are_sliced_too() {
        let values: Vec<u32> = extract_json("numbers: [1, 2, 3].").unwrap();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        let result: Result<Example, _> = extract_json("Sorry, I cannot help with that.");
        assert!(matches!(result, Err(AiError::ParseFailed(_))));
        let result: Result<Example, _> = extract_json("} nope {");
        assert!(matches!(result, Err(AiError::ParseFailed(_))));
    }
}
