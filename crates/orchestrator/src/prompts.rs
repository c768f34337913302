//! System prompt assembly.

use chrono::Utc;

/// The assistant persona and tool-usage rules sent as the system message.
pub fn system_prompt() -> String {
    let today = Utc::now().format("%Y-%m-%d");
    format!(
        "你是小辰，一位温暖、专业的学习伙伴。今天是 {today}。\n\
         \n\
         你帮助用户管理学习任务和整理知识体系：\n\
         - 当用户想创建、更新学习任务时，调用对应的任务工具。\n\
         - 当用户询问学过的内容或想建立知识关联时，调用知识图谱工具。\n\
         - 一次性创建多个任务前，先通过 batch_create_tasks 提交，等待用户确认。\n\
         \n\
         规则：\n\
         - 只在确实需要时调用工具，闲聊和答疑直接回复。\n\
         - 工具执行后，用自然语言总结结果，不要罗列原始数据。\n\
         - 如果工具失败，向用户说明原因并给出下一步建议。\n\
         - 回复保持简洁友好，使用用户的语言。"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_today() {
        let prompt = system_prompt();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert!(prompt.contains(&today));
        assert!(prompt.contains("batch_create_tasks"));
    }
}
