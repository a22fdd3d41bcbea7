//! Turns a free-text case description into the four-section structure the rest of the
//! pipeline works with. The model does the extraction; this side cleans the text going
//! in and pulls a JSON object out of whatever comes back.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::warn;

use crate::llm::Completion;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

// Letters, digits, whitespace and the punctuation that shows up in case files.
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^\p{Han}\w\s，。！？；：“”‘’"'（）【】\-\.]"#).unwrap());

/// How much of the input is kept as the main behaviour when extraction fails.
const FALLBACK_BEHAVIOR_CHARS: usize = 100;

/// Trim, collapse whitespace runs to one space and drop unexpected symbols.
pub fn clean_text(text: &str) -> String {
    let collapsed = WHITESPACE.replace_all(text.trim(), " ");
    DISALLOWED.replace_all(&collapsed, "").into_owned()
}

pub fn extraction_prompt(text: &str) -> String {
    format!(
        r#"请从以下案件描述中提取关键信息，并按照以下JSON格式输出：

案件描述：{text}

请输出JSON格式：
{{
    "主体信息": {{
        "姓名": "当事人姓名",
        "年龄": "年龄信息",
        "前科情况": "是否有前科或累犯情况",
        "其他身份特征": "其他相关身份信息"
    }},
    "行为描述": {{
        "主要行为": "核心犯罪行为描述",
        "行为时间": "行为发生的时间",
        "行为地点": "行为发生的地点",
        "行为方式": "具体的行为方式和手段"
    }},
    "结果情况": {{
        "直接后果": "行为造成的直接后果",
        "损失程度": "造成的损失或伤害程度",
        "社会影响": "对社会造成的影响"
    }},
    "其他情节": {{
        "从轻情节": "可能的从轻处罚情节",
        "从重情节": "可能的从重处罚情节",
        "特殊情况": "其他需要考虑的特殊情况"
    }}
}}"#
    )
}

/// Extract the JSON object from a model reply.
///
/// Models like to wrap the object in a ```json fence or a sentence of prose, so the
/// outermost `{ ... }` span is parsed. Anything that is not an object is rejected.
pub fn parse_structured(reply: &str) -> Option<Value> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str::<Value>(&reply[start..=end]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// The structure used when the model can't be reached or its reply can't be parsed.
pub fn fallback_structure(text: &str, status: &str) -> Value {
    let behavior: String = text.chars().take(FALLBACK_BEHAVIOR_CHARS).collect();
    json!({
        "原始输入": text,
        "处理状态": status,
        "主体信息": {"姓名": "未知", "年龄": "未知", "前科情况": "未知", "其他身份特征": ""},
        "行为描述": {"主要行为": behavior, "行为时间": "未知", "行为地点": "未知", "行为方式": ""},
        "结果情况": {"直接后果": "待分析", "损失程度": "待分析", "社会影响": "待分析"},
        "其他情节": {"从轻情节": "", "从重情节": "", "特殊情况": ""}
    })
}

pub struct InputNormalizer<'a, C> {
    llm: &'a C,
}

impl<'a, C: Completion> InputNormalizer<'a, C> {
    pub fn new(llm: &'a C) -> Self {
        Self { llm }
    }

    /// Clean and structure `raw`. Never fails; see [`fallback_structure`].
    pub async fn process(&self, raw: &str) -> Value {
        let text = clean_text(raw);
        match self.llm.complete(&extraction_prompt(&text)).await {
            Ok(reply) => parse_structured(&reply).unwrap_or_else(|| {
                warn!("Extraction reply was not a JSON object, using raw input");
                fallback_structure(&text, "JSON解析失败，使用原始输入")
            }),
            Err(e) => {
                warn!("Extraction request failed: {e}");
                fallback_structure(&text, &format!("处理失败: {e}"))
            }
        }
    }
}
