//! Final conviction and sentencing recommendation, written by the model from the four
//! dimension analyses and the closest precedents.

use serde::Serialize;
use serde_json::Value;

use super::render_case;
use crate::llm::{Completion, LlmError};
use crate::records::{KnowledgeKind, RetrievedItem};

/// Cases must score above this to be offered as precedent.
pub const SIMILARITY_THRESHOLD: f32 = 0.7;
pub const MAX_SIMILAR_CASES: usize = 5;

const DECISION_OUTLINE: &str = "\
# 案件定性分析

## 1. 罪名认定
- 主要罪名：
- 罪名依据：
- 是否存在竞合：

## 2. 犯罪构成分析
- 犯罪主体：
- 主观方面：
- 客观方面：
- 犯罪客体：

## 3. 量刑情节综合评估

### 从重情节：
- 具体情节及影响度评估

### 从轻情节：
- 具体情节及影响度评估

### 减轻情节：
- 具体情节及影响度评估

## 4. 量刑建议

### 基准刑确定：
- 法定刑幅度：
- 基准刑选择理由：

### 量刑调节：
- 从重处罚调节：
- 从轻处罚调节：
- 减轻处罚调节：

### 最终刑罚建议：
- 主刑：
- 附加刑（如适用）：
- 缓刑适用性分析：

## 5. 争议点分析
- 可能存在的争议点：
- 风险提示：
- 补强证据建议：

## 6. 类似案例对比
- 量刑区间参考：
- 本案特殊性：
- 量刑合理性论证：

## 7. 综合结论

**定罪建议**：[具体罪名]

**量刑建议**：[具体刑期及执行方式]

**主要理由**：[简要说明定罪量刑的核心依据]

**注意事项**：[审理和执行中需要特别关注的问题]";

/// The four dimension analyses, in the order they appear in the decision prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DimensionAnalyses {
    pub subject: String,
    pub behavior: String,
    pub scenario: String,
    pub result: String,
}

pub fn similar_cases(knowledge: &[RetrievedItem]) -> Vec<&RetrievedItem> {
    knowledge
        .iter()
        .filter(|item| {
            item.kind() == KnowledgeKind::Case && item.relevance_score > SIMILARITY_THRESHOLD
        })
        .take(MAX_SIMILAR_CASES)
        .collect()
}

pub fn format_similar_cases(cases: &[&RetrievedItem]) -> String {
    let formatted: Vec<String> = cases
        .iter()
        .filter_map(|item| item.item.case().map(|c| (c, item.relevance_score)))
        .map(|(c, score)| {
            format!(
                "【案例{}】\n案情：{}\n判决：{}\n适用条文：{}\n相似度：{:.2}",
                c.case_id, c.summary, c.verdict, c.applied_articles, score
            )
        })
        .collect();

    if formatted.is_empty() {
        "暂无高度相似案例".to_string()
    } else {
        formatted.join("\n\n")
    }
}

pub fn build_decision_prompt(
    case_data: &Value,
    knowledge: &[RetrievedItem],
    analyses: &DimensionAnalyses,
) -> String {
    let similar = similar_cases(knowledge);
    format!(
        "作为资深的法官和刑法专家，请基于以下所有分析内容，做出最终的定罪量刑决策：\n\n\
         【案件基本信息】\n{case}\n\n\
         【主体分析结果】\n{subject}\n\n\
         【行为分析结果】\n{behavior}\n\n\
         【情节分析结果】\n{scenario}\n\n\
         【结果分析结果】\n{result}\n\n\
         【类似案例参考】\n{similar}\n\n\
         请按照以下结构提供最终决策：\n\n{outline}\n\n\
         请确保分析逻辑清晰、法条引用准确、量刑建议合理适当。",
        case = render_case(case_data),
        subject = analyses.subject,
        behavior = analyses.behavior,
        scenario = analyses.scenario,
        result = analyses.result,
        similar = format_similar_cases(&similar),
        outline = DECISION_OUTLINE,
    )
}

pub struct DecisionSynthesizer<'a, C> {
    llm: &'a C,
}

impl<'a, C: Completion> DecisionSynthesizer<'a, C> {
    pub fn new(llm: &'a C) -> Self {
        Self { llm }
    }

    pub async fn decide(
        &self,
        case_data: &Value,
        knowledge: &[RetrievedItem],
        analyses: &DimensionAnalyses,
    ) -> Result<String, LlmError> {
        let prompt = build_decision_prompt(case_data, knowledge, analyses);
        self.llm.complete(&prompt).await
    }
}
