//! LLM 客户端抽象
//!
//! 编排循环把 LLM 视为不透明函数：Transcript → 原始文本；文本解析为 Step 由 react::step 负责。

use async_trait::async_trait;

use crate::memory::Message;

/// LLM 客户端 trait：一次非流式补全
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
