//! 流式 JSON 拼装器：从任意切分的文本流中逐个取出完整的 JSON 对象
//!
//! 每次 feed 追加到缓冲区，扫描 `{` 与其匹配的 `}`（忽略字符串内的括号，处理反斜杠转义），
//! 对每个完整片段做一次反序列化；失败的片段记录后跳过，不影响同一块中后续对象。
//! 一轮扫描后丢弃最后一个已匹配 `}` 之前的文本，保留尾部未完成的部分等待下一块。
//! SSE 的 `data:` 分帧由服务商适配层处理，这里只看到解包后的文本。

use std::marker::PhantomData;

use serde::de::DeserializeOwned;

#[derive(Debug)]
pub struct StreamingJsonAssembler<T> {
    buffer: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> StreamingJsonAssembler<T> {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            _marker: PhantomData,
        }
    }

    /// 追加一块文本，返回本次新解析出的对象（按出现顺序）
    pub fn feed(&mut self, chunk: &str) -> Vec<T> {
        self.buffer.push_str(chunk);

        let mut parsed = Vec::new();
        let mut consumed = 0;
        let mut search_from = 0;

        while let Some(offset) = self.buffer[search_from..].find('{') {
            let start = search_from + offset;
            let Some(end) = find_matching_brace(&self.buffer, start) else {
                break;
            };
            let span = &self.buffer[start..=end];
            match serde_json::from_str::<T>(span) {
                Ok(value) => parsed.push(value),
                Err(e) => tracing::warn!(error = %e, raw = span, "Skipped malformed JSON object in stream"),
            }
            consumed = end + 1;
            search_from = end + 1;
        }

        if consumed > 0 {
            self.buffer.drain(..consumed);
        }
        parsed
    }

    /// 未消费的尾部文本
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// 重试前清空缓冲区
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl<T: DeserializeOwned> Default for StreamingJsonAssembler<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// 从 `start`（必须是 `{`）起找到匹配的 `}` 的字节位置
fn find_matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
