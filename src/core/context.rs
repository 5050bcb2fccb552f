//! Prompt 组装：系统指令与人物块、请求修饰、检索参数解析

use serde::Deserialize;

use crate::talk::{DialogueRequest, TalkKind};
use crate::world::Situation;

/// 内置系统指令（配置中 talk.instruction 为空时使用）
pub const DEFAULT_INSTRUCTION: &str = "Role-play colony characters per profile

Rules:
Preserve original names (no translation)
Keep each line short (1-2 sentences)
Show concern for sickness and distress
Never mention another character's personal name unless they share the same role

Roles:
Prisoner: wary, hesitant; mention confinement; plead or bargain
Slave: fearful, obedient; reference forced labor and exhaustion
Visitor: polite, curious, deferential; treat other visitors in the same group as companions
Enemy: hostile, aggressive; terse commands and threats

Monologue = 1 turn. Conversation = 4-8 short turns";

/// 输出格式要求，写入历史前会去掉
pub const FORMAT_INSTRUCTION: &str =
    "\n\nReturn JSON array only, with objects containing \"name\" and \"text\" string keys";

/// 检索词生成指令，后接原始 prompt
pub const SEARCH_INSTRUCTION: &str = "You optimize queries for a memory search. Analyze the dialogue prompt below and return a JSON object with:
content: a list of concise search keys, each a single attribute, thing or concept suited to semantic similarity search
num: how many related memories to fetch (1-10, by query complexity)

Start from the dialogue request at the very beginning of the prompt; the rest is reference only.

Example: {\"content\":[\"harvest\",\"raid\",\"medicine\"],\"num\":5}
Return the JSON object only.

Prompt:";

/// 检索词数量上限
const MAX_SEARCH_RESULTS: usize = 10;

pub fn instruction_or_default(custom: &str) -> &str {
    if custom.trim().is_empty() {
        DEFAULT_INSTRUCTION
    } else {
        custom
    }
}

/// 单个参与者的描述块：宿主描述 + 性格
pub fn person_block(description: &str, personality: &str) -> String {
    let mut block = description.trim_end().to_string();
    if !personality.trim().is_empty() {
        block.push_str("\nPersonality: ");
        block.push_str(personality.trim());
    }
    block
}

/// 系统指令 + 每个参与者的 `[Person N START] ... [Person N END]` 块
pub fn build_context(instruction: &str, people: &[String]) -> String {
    let mut context = String::from(instruction);
    context.push_str("\n\n");
    for (i, block) in people.iter().enumerate() {
        let n = i + 1;
        context.push_str(&format!("\n[Person {n} START]\n{block}\n[Person {n} END]\n"));
    }
    context
}

/// 修饰后的 prompt：类型标题、对话引导、当前状态、时间天气与输出格式
///
/// `names` 为参与者显示名，第一个是发起者。
pub fn decorate_prompt(request: &DialogueRequest, names: &[String], status: &str, situation: &Situation) -> String {
    let speaker = names.first().map(String::as_str).unwrap_or("Someone");
    let prompt = request.prompt.trim();
    let mut out = format!("[{}]\n", request.kind.header());

    if request.is_user() {
        match names.get(1).filter(|_| request.recipient.is_some()) {
            Some(other) => out.push_str(&format!(
                "{other} says to {speaker}: {prompt}. Generate a few turns starting with {speaker}."
            )),
            None => out.push_str(&format!("A voice from beyond the world says to {speaker}: {prompt}")),
        }
    } else {
        if request.monologue {
            out.push_str(&format!("{speaker}'s monologue"));
        } else if request.kind == TalkKind::Urgent {
            out.push_str(&format!("{speaker} starts a short, urgent conversation"));
        } else {
            out.push_str(&format!("{speaker} starts a conversation, taking turns"));
        }
        if !prompt.is_empty() {
            out.push('\n');
            out.push_str(prompt);
        }
    }

    if !status.is_empty() {
        out.push('\n');
        out.push_str(status);
    }
    out.push_str(&format!(
        "\nTime: {}\nDate: {}\nSeason: {}\nWeather: {}",
        situation.time_of_day, situation.date, situation.season, situation.weather
    ));
    out.push_str(FORMAT_INSTRUCTION);
    out
}

/// 写入历史的 prompt 不带格式要求
pub fn strip_format(prompt: &str) -> String {
    prompt.replace(FORMAT_INSTRUCTION, "")
}

/// 检索请求正文
pub fn search_request(prompt: &str) -> String {
    format!("{SEARCH_INSTRUCTION}\n{prompt}")
}

/// 检索参数：检索词与结果数
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchParams {
    pub content: Vec<String>,
    pub num: usize,
}

impl SearchParams {
    pub fn fallback(prompt: &str, default_num: usize) -> Self {
        Self {
            content: vec![prompt.to_string()],
            num: default_num.clamp(1, MAX_SEARCH_RESULTS),
        }
    }
}

#[derive(Deserialize)]
struct RawSearchParams {
    #[serde(default)]
    content: Vec<String>,
    num: Option<i64>,
}

/// 解析模型返回的 `{"content":[...],"num":n}`
///
/// 容忍代码块围栏与结尾分号；num 限制在 1..=10；解析失败或检索词为空时回退为 `[prompt]` + 默认数量。
pub fn parse_search_params(raw: &str, prompt: &str, default_num: usize) -> SearchParams {
    let body = match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    };
    let body = body.trim().trim_end_matches(';');

    match serde_json::from_str::<RawSearchParams>(body) {
        Ok(parsed) => {
            let content: Vec<String> = parsed
                .content
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if content.is_empty() {
                return SearchParams::fallback(prompt, default_num);
            }
            let num = parsed
                .num
                .map(|n| n.clamp(1, MAX_SEARCH_RESULTS as i64) as usize)
                .unwrap_or_else(|| default_num.clamp(1, MAX_SEARCH_RESULTS));
            SearchParams { content, num }
        }
        Err(e) => {
            tracing::debug!(error = %e, "Search params unparseable, using prompt");
            SearchParams::fallback(prompt, default_num)
        }
    }
}
