//! 固定指令：优先读取 config/prompts/*.txt，缺失时使用内置默认值

use crate::pipeline::schema::{nutrition_record_schema_json, vision_assessment_schema_json};

const DEFAULT_VISION: &str = "你是一名膳食识别助手。判断图片是否清晰且包含食物。\
若不合法，is_valid 为 false，并在 reason 中说明原因（如：图片模糊、非食物、无图片），report 留空。\
若合法，is_valid 为 true，reason 留空，并在 report 中逐项列出菜品：类别、名称、食材组成（估计克数）、视觉特征。\
只输出一个 JSON 对象。";

const DEFAULT_RESEARCH: &str = "你是一名烹饪与营养研究助手。根据视觉报告中的菜品与食材，\
使用搜索工具查询这些菜品的典型做法，估算每道菜的用油量（克）与用盐量（克）。\
信息足够后，不再调用工具，直接用中文给出每道菜的食材克数、油盐用量与依据，例如 \"oil:15 salt:3\"。";

const DEFAULT_SUMMARIZE: &str = "你是一名营养师。把给定事实映射到中国居民膳食宝塔 L1-L5：\
L1 谷薯类，L2 蔬菜水果，L3 畜禽鱼蛋，L4 奶及大豆坚果，L5 油(oil) 与盐(salt)，数值单位为克。\
只输出一个符合下列 JSON Schema 的对象，不要附加任何解释。";

fn load_prompt(name: &str, default: &str) -> String {
    [
        format!("config/prompts/{}.txt", name),
        format!("../config/prompts/{}.txt", name),
    ]
    .into_iter()
    .find_map(|p| std::fs::read_to_string(p).ok())
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .unwrap_or_else(|| default.to_string())
}

/// 视觉阶段指令（附带输出 schema）
pub fn vision_instruction() -> String {
    format!(
        "{}\n\nJSON Schema:\n{}",
        load_prompt("vision", DEFAULT_VISION),
        vision_assessment_schema_json()
    )
}

/// 研究循环 system 指令
pub fn research_instruction() -> String {
    load_prompt("research", DEFAULT_RESEARCH)
}

/// Summarizer 指令（附带 NutritionRecord schema）
pub fn summarize_instruction() -> String {
    format!(
        "{}\n\nJSON Schema:\n{}",
        load_prompt("summarize", DEFAULT_SUMMARIZE),
        nutrition_record_schema_json()
    )
}

/// 研究循环的触发内容
pub fn research_trigger(vision_report: &str) -> String {
    format!("视觉报告如下：{}，开始分析油盐含量。", vision_report)
}

/// Summarizer 的用户输入
pub fn summarize_input(extracted_info: &str) -> String {
    format!("请根据以下事实进行 L1-L5 映射计算：\n{}", extracted_info)
}
