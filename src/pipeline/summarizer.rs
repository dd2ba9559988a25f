//! Summarizer：一次文本模型调用，把研究结论映射为 L1-L5 并解码为 NutritionRecord
//!
//! 解码前提取 ``` 代码围栏或花括号内的 JSON；解码或校验失败由调用方记为 MalformedRecord，不抛出。

use std::sync::Arc;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;
use crate::pipeline::prompts::{summarize_input, summarize_instruction};
use crate::pipeline::NutritionRecord;

pub struct Summarizer {
    llm: Arc<dyn LlmClient>,
    instruction: String,
}

impl Summarizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            instruction: summarize_instruction(),
        }
    }

    /// 恰好一次模型调用，返回原始输出
    pub async fn summarize(&self, extracted_info: &str) -> Result<String, LlmError> {
        let messages = [
            Message::system(self.instruction.clone()),
            Message::user(summarize_input(extracted_info)),
        ];
        self.llm.complete(&messages).await
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}

/// 提取模型输出中的 JSON 主体
///
/// 先找任意位置的 ``` 围栏（可带 json 等语言标记），取围栏内文本；
/// 没有围栏时取第一个 `{` 到最后一个 `}`；都没有则原样返回（trim 后）。
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find("```") {
        let rest = trimmed[start + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
        return rest
            .find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim());
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// 解码并校验 NutritionRecord
pub fn decode_record(raw: &str) -> Result<NutritionRecord, String> {
    let body = strip_code_fence(raw);
    let record: NutritionRecord =
        serde_json::from_str(body).map_err(|e| format!("decode failed: {}", e))?;
    record.validate()?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::demo_record_json;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json {\"a\":1}```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("结果如下：\n```json\n{\"a\":1}\n```\n以上"), "{\"a\":1}");
        assert_eq!(strip_code_fence("结果：{\"a\":{\"b\":2}} 完毕"), "{\"a\":{\"b\":2}}");
        assert_eq!(strip_code_fence("抱歉"), "抱歉");
    }

    #[test]
    fn test_record_after_preamble_decodes() {
        let bare = demo_record_json();
        let chatty = format!("结果如下：\n```json{}```", bare);
        assert_eq!(decode_record(&chatty).unwrap(), decode_record(&bare).unwrap());
    }

    #[test]
    fn test_fenced_and_bare_decode_identically() {
        let bare = demo_record_json();
        let fenced = format!("```json\n{}\n```", bare);
        assert_eq!(decode_record(&bare).unwrap(), decode_record(&fenced).unwrap());
    }

    #[test]
    fn test_malformed_records() {
        assert!(decode_record("抱歉，我无法计算").is_err());
        let mut v: serde_json::Value = serde_json::from_str(&demo_record_json()).unwrap();
        v["pagoda_nutrition_vector"]["L5"]["oil"] = serde_json::json!("很多");
        assert!(decode_record(&v.to_string()).is_err());
        v["pagoda_nutrition_vector"]["L5"]["oil"] = serde_json::json!(-1);
        assert!(decode_record(&v.to_string()).unwrap_err().contains("L5.oil"));
    }

    #[tokio::test]
    async fn test_summarize_issues_one_call() {
        let llm = Arc::new(ScriptedLlmClient::single(demo_record_json()));
        let s = Summarizer::new(llm.clone());
        let raw = s.summarize("oil:15 salt:3").await.unwrap();
        assert_eq!(llm.calls(), 1);
        let record = decode_record(&raw).unwrap();
        assert_eq!(record.nutrition_vector.l5.salt, 3.0);
    }
}
