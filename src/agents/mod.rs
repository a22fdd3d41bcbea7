//! # Analysis agents
//!
//! Each agent looks at the case from one angle ([`AnalysisDimension`]), picks the part
//! of the retrieved knowledge relevant to that angle, renders a prompt and hands it to
//! a [`Completion`] service. The reasoning itself happens in the model.
//!
//! Selection is deliberately simple and happens here rather than in the retrieval
//! engine: statutes are kept when their content mentions one of the dimension's
//! keywords (first [`MAX_STATUTES`]), cases are kept as ranked (first [`MAX_CASES`]).

pub mod decision;
pub mod input;

use serde_json::Value;

use crate::llm::{Completion, LlmError};
use crate::records::{KnowledgeKind, RetrievedItem};

pub const MAX_STATUTES: usize = 5;
pub const MAX_CASES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisDimension {
    Subject,
    Behavior,
    Scenario,
    Result,
}

impl AnalysisDimension {
    pub const ALL: [AnalysisDimension; 4] = [
        AnalysisDimension::Subject,
        AnalysisDimension::Behavior,
        AnalysisDimension::Scenario,
        AnalysisDimension::Result,
    ];

    /// Terms that mark a statute as relevant to this dimension.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            AnalysisDimension::Subject => {
                &["主体", "年龄", "累犯", "初犯", "未成年", "精神", "责任能力"]
            }
            AnalysisDimension::Behavior => {
                &["行为", "故意", "过失", "手段", "方法", "犯罪构成", "客观要件"]
            }
            AnalysisDimension::Scenario => &[
                "情节", "从轻", "从重", "减轻", "加重", "特别严重", "严重", "轻微",
            ],
            AnalysisDimension::Result => &[
                "结果", "后果", "损失", "伤害", "死亡", "财产", "精神", "社会危害",
            ],
        }
    }

    /// Short name used in prompts and reports.
    pub fn label(self) -> &'static str {
        match self {
            AnalysisDimension::Subject => "主体",
            AnalysisDimension::Behavior => "行为",
            AnalysisDimension::Scenario => "情节",
            AnalysisDimension::Result => "结果",
        }
    }

    fn checklist(self) -> &'static str {
        match self {
            AnalysisDimension::Subject => {
                "1. 主体身份认定\n\
                 - 当事人基本信息分析\n\
                 - 刑事责任能力评估\n\
                 - 特殊身份考量（如国家工作人员、未成年人等）\n\
                 2. 年龄因素分析\n\
                 - 行为时年龄确定\n\
                 - 年龄对量刑的影响\n\
                 - 是否适用特殊程序\n\
                 3. 前科及累犯分析\n\
                 - 前科情况梳理\n\
                 - 是否构成累犯\n\
                 - 对量刑的影响程度\n\
                 4. 其他主体因素\n\
                 - 精神状态评估\n\
                 - 社会危险性评估"
            }
            AnalysisDimension::Behavior => {
                "1. 行为性质认定\n\
                 - 行为的具体表现\n\
                 - 行为与犯罪构成要件的对应关系\n\
                 2. 主观方面分析\n\
                 - 故意或过失的认定\n\
                 - 犯罪目的与动机\n\
                 3. 行为手段与方式\n\
                 - 作案手段的危险性\n\
                 - 是否使用暴力、胁迫或其他特殊方法\n\
                 4. 行为阶段分析\n\
                 - 预备、未遂、中止或既遂\n\
                 - 共同犯罪中的地位和作用"
            }
            AnalysisDimension::Scenario => {
                "1. 法定从重情节\n\
                 - 累犯、教唆未成年人等情形\n\
                 2. 法定从轻、减轻情节\n\
                 - 自首、立功、坦白\n\
                 - 未遂、中止、从犯\n\
                 3. 酌定量刑情节\n\
                 - 认罪认罚、退赃退赔、取得谅解\n\
                 - 犯罪动机与一贯表现\n\
                 4. 情节严重程度\n\
                 - 是否属于情节严重或特别严重\n\
                 - 各情节对量刑的综合影响"
            }
            AnalysisDimension::Result => {
                "1. 直接后果认定\n\
                 - 人身伤害或死亡情况\n\
                 - 财产损失数额\n\
                 2. 损失程度评估\n\
                 - 数额较大、巨大或特别巨大的认定\n\
                 - 伤情等级\n\
                 3. 社会危害性\n\
                 - 对社会秩序和公共安全的影响\n\
                 4. 因果关系与挽回情况\n\
                 - 行为与结果之间的因果关系\n\
                 - 损失是否已挽回及其对量刑的影响"
            }
        }
    }
}

/// Statutes whose content mentions any of `keywords`, in ranked order, at most `limit`.
pub fn select_statutes<'a>(
    knowledge: &'a [RetrievedItem],
    keywords: &[&str],
    limit: usize,
) -> Vec<&'a RetrievedItem> {
    knowledge
        .iter()
        .filter(|item| item.kind() == KnowledgeKind::Statute)
        .filter(|item| {
            let content = item.item.content_text();
            keywords.iter().any(|keyword| content.contains(keyword))
        })
        .take(limit)
        .collect()
}

/// Cases in ranked order, at most `limit`.
pub fn select_cases(knowledge: &[RetrievedItem], limit: usize) -> Vec<&RetrievedItem> {
    knowledge
        .iter()
        .filter(|item| item.kind() == KnowledgeKind::Case)
        .take(limit)
        .collect()
}

pub fn format_statutes(statutes: &[&RetrievedItem]) -> String {
    statutes
        .iter()
        .filter_map(|item| item.item.statute())
        .map(|s| {
            format!(
                "【{}】{}\n说明：{}",
                s.article_id, s.article_text, s.explanation
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn format_cases(cases: &[&RetrievedItem]) -> String {
    cases
        .iter()
        .filter_map(|item| item.item.case())
        .map(|c| format!("案例{}：{}\n判决：{}", c.case_id, c.summary, c.verdict))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Case data as shown to the model.
pub fn render_case(case_data: &Value) -> String {
    match case_data {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Render the prompt for one dimension.
pub fn build_analysis_prompt(
    dimension: AnalysisDimension,
    case_data: &Value,
    knowledge: &[RetrievedItem],
) -> String {
    let statutes = select_statutes(knowledge, dimension.keywords(), MAX_STATUTES);
    let cases = select_cases(knowledge, MAX_CASES);
    let label = dimension.label();

    format!(
        "作为专业的刑法{label}分析专家，请根据以下信息进行{label}分析：\n\n\
         案件信息：\n{case}\n\n\
         相关法律条文：\n{statutes}\n\n\
         相关案例：\n{cases}\n\n\
         请从以下维度进行{label}分析：\n\n{checklist}\n\n\
         请提供详细的分析过程和结论，并引用相关法条。",
        case = render_case(case_data),
        statutes = format_statutes(&statutes),
        cases = format_cases(&cases),
        checklist = dimension.checklist(),
    )
}

/// One LLM-backed analysis over a single dimension.
pub struct AnalysisAgent<'a, C> {
    dimension: AnalysisDimension,
    llm: &'a C,
}

impl<'a, C: Completion> AnalysisAgent<'a, C> {
    pub fn new(dimension: AnalysisDimension, llm: &'a C) -> Self {
        Self { dimension, llm }
    }

    pub fn dimension(&self) -> AnalysisDimension {
        self.dimension
    }

    pub async fn analyze(
        &self,
        case_data: &Value,
        knowledge: &[RetrievedItem],
    ) -> Result<String, LlmError> {
        let prompt = build_analysis_prompt(self.dimension, case_data, knowledge);
        tracing::debug!("Running {} analysis", self.dimension.label());
        self.llm.complete(&prompt).await
    }
}
