//! 生成结果：流式解析出的单句台词与回复链

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TalkKind;
use crate::core::TalkError;

/// 模型输出的线上格式：`[{"name": "...", "text": "..."}, ...]`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkLine {
    pub name: String,
    pub text: String,
}

/// 待展示的一句台词
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DialogueResponse {
    pub id: Uuid,
    pub name: String,
    pub text: String,
    /// 同一轮中的上一句；首句为 nil
    pub parent: Uuid,
    pub kind: TalkKind,
}

impl DialogueResponse {
    pub fn new(line: TalkLine, parent: Uuid, kind: TalkKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: line.name,
            text: line.text,
            parent,
            kind,
        }
    }

    pub fn is_reply(&self) -> bool {
        !self.parent.is_nil()
    }

    pub fn to_line(&self) -> TalkLine {
        TalkLine {
            name: self.name.clone(),
            text: self.text.clone(),
        }
    }
}

/// 修正模型输出中常见的结构问题，返回待解析的 JSON 文本
///
/// 去掉 ```json 代码块标记，截取第一个 `{`/`[` 到最后一个 `}`/`]`，
/// 合并 `][`、补齐 `}{` 之间的逗号，拆开 `{[...]}`，单个对象包成数组。
/// 找不到 JSON 时返回 None。
pub fn sanitize_transcript(raw: &str) -> Option<String> {
    let stripped = raw.replace("```json", "").replace("```", "");
    let stripped = stripped.trim();

    let start = stripped.find(['{', '['])?;
    let end = stripped.rfind(['}', ']'])?;
    if end <= start {
        return None;
    }
    let mut text = stripped[start..=end].trim().replace("][", ",").replace("}{", "},{");

    if text.starts_with('{') && text.ends_with('}') {
        let inner = text[1..text.len() - 1].trim();
        if inner.starts_with('[') && inner.ends_with(']') {
            text = inner.to_string();
        }
    }
    if text.starts_with('{') {
        text = format!("[{text}]");
    }
    Some(text)
}

/// 校验完整输出是否为合法的台词数组（先做结构修正）
pub fn validate_transcript(raw: &str) -> Result<Vec<TalkLine>, TalkError> {
    let text = sanitize_transcript(raw)
        .ok_or_else(|| TalkError::MalformedResponse("no JSON found in response".to_string()))?;
    serde_json::from_str::<Vec<TalkLine>>(&text).map_err(|e| TalkError::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_chain() {
        let first = DialogueResponse::new(
            TalkLine { name: "Ann".into(), text: "Hi".into() },
            Uuid::nil(),
            TalkKind::Ordinary,
        );
        let second = DialogueResponse::new(
            TalkLine { name: "Bob".into(), text: "Hey".into() },
            first.id,
            TalkKind::Ordinary,
        );
        assert!(!first.is_reply());
        assert!(second.is_reply());
        assert_eq!(second.parent, first.id);
    }

    #[test]
    fn test_streamed_lines_pass_final_check() {
        let responses = vec![
            DialogueResponse::new(
                TalkLine { name: "Ann".into(), text: "Quote \"this\" {ok}".into() },
                Uuid::nil(),
                TalkKind::Event,
            ),
            DialogueResponse::new(
                TalkLine { name: "Bob".into(), text: "Sure.".into() },
                Uuid::nil(),
                TalkKind::Event,
            ),
        ];
        let lines: Vec<TalkLine> = responses.iter().map(DialogueResponse::to_line).collect();
        let raw = serde_json::to_string(&lines).unwrap();
        assert_eq!(validate_transcript(&raw).unwrap(), lines);
    }

    fn ann_hi() -> Vec<TalkLine> {
        vec![TalkLine { name: "Ann".into(), text: "hi".into() }]
    }

    #[test]
    fn test_fenced_transcript_accepted() {
        let raw = "```json\n[{\"name\":\"Ann\",\"text\":\"hi\"}]\n```";
        assert_eq!(validate_transcript(raw).unwrap(), ann_hi());
    }

    #[test]
    fn test_surrounding_prose_is_sliced_off() {
        let raw = r#"Here you go: [{"name":"Ann","text":"hi"}] Enjoy!"#;
        assert_eq!(validate_transcript(raw).unwrap(), ann_hi());
    }

    #[test]
    fn test_single_object_wrapped_in_array() {
        assert_eq!(validate_transcript(r#"{"name":"Ann","text":"hi"}"#).unwrap(), ann_hi());
    }

    #[test]
    fn test_split_arrays_are_merged() {
        let raw = r#"[{"name":"Ann","text":"hi"}][{"name":"Bob","text":"yo"}]"#;
        let lines = validate_transcript(raw).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].name, "Bob");
    }

    #[test]
    fn test_adjacent_objects_get_commas() {
        let raw = r#"[{"name":"Ann","text":"hi"}{"name":"Bob","text":"yo"}]"#;
        assert_eq!(validate_transcript(raw).unwrap().len(), 2);
        let bare = r#"{"name":"Ann","text":"hi"}{"name":"Bob","text":"yo"}"#;
        assert_eq!(validate_transcript(bare).unwrap().len(), 2);
    }

    #[test]
    fn test_object_wrapping_array_is_unwrapped() {
        let raw = r#"{[{"name":"Ann","text":"hi"}]}"#;
        assert_eq!(sanitize_transcript(raw).unwrap(), r#"[{"name":"Ann","text":"hi"}]"#);
        assert_eq!(validate_transcript(raw).unwrap(), ann_hi());
    }

    #[test]
    fn test_no_json_rejected() {
        assert_eq!(sanitize_transcript("sorry, I cannot"), None);
        assert!(matches!(
            validate_transcript("sorry, I cannot").unwrap_err(),
            TalkError::MalformedResponse(_)
        ));
    }

    #[test]
    fn test_truncated_transcript_rejected() {
        let err = validate_transcript(r#"[{"name":"Ann","text":"Hi"},{"name":"Bo"#).unwrap_err();
        assert!(matches!(err, TalkError::MalformedResponse(_)));
    }
}
