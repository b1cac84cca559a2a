/*!
 * Failure classification for task-level retry decisions.
 *
 * Classification is a best-effort heuristic over the textual description of a
 * failure, not a type-safe taxonomy: the error messages of the remote and
 * database layers are matched against an ordered phrase table. Permanent
 * phrases come first, so a description matching both lists is permanent.
 */

use std::fmt;

/// Three-way classification driving task-level retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retrying cannot help (bad input, auth, not-found, unparsable content)
    Permanent,
    /// Transient condition (timeouts, 5xx, rate limits, dead connections)
    Retryable,
    /// Nothing in the table matched
    Unknown,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Permanent => write!(f, "permanent"),
            FailureClass::Retryable => write!(f, "retryable"),
            FailureClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// Ordered phrase table, lowercase. First match wins.
///
/// Upstream services report failures in Chinese, so both wordings are listed.
const CLASSIFICATION_TABLE: &[(&str, FailureClass)] = &[
    // Permanent
    ("not found (404)", FailureClass::Permanent),
    ("forbidden (403)", FailureClass::Permanent),
    ("client error 400", FailureClass::Permanent),
    ("client error 401", FailureClass::Permanent),
    ("client error 403", FailureClass::Permanent),
    ("failed to parse subtitle document", FailureClass::Permanent),
    ("no translated content produced", FailureClass::Permanent),
    ("字幕文件不存在 (404)", FailureClass::Permanent),
    ("无权限访问字幕文件 (403)", FailureClass::Permanent),
    ("客户端错误 400", FailureClass::Permanent),
    ("客户端错误 401", FailureClass::Permanent),
    ("客户端错误 403", FailureClass::Permanent),
    ("解析srt文件失败", FailureClass::Permanent),
    ("api未返回有效的翻译内容", FailureClass::Permanent),
    // Retryable
    ("503 server error", FailureClass::Retryable),
    ("service unavailable", FailureClass::Retryable),
    ("rate limited", FailureClass::Retryable),
    ("network error", FailureClass::Retryable),
    ("connection error", FailureClass::Retryable),
    ("request timed out", FailureClass::Retryable),
    ("download timed out", FailureClass::Retryable),
    ("server error", FailureClass::Retryable),
    ("dead connection", FailureClass::Retryable),
    ("connection pool exhausted", FailureClass::Retryable),
    ("database operational error", FailureClass::Retryable),
    ("网络错误", FailureClass::Retryable),
    ("连接错误", FailureClass::Retryable),
    ("请求超时", FailureClass::Retryable),
    ("下载超时", FailureClass::Retryable),
    ("所有gemini模型均失败", FailureClass::Retryable),
    ("服务器错误", FailureClass::Retryable),
    ("死连接", FailureClass::Retryable),
];

/// Classify a failure description (case-insensitive substring match)
pub fn classify(description: &str) -> FailureClass {
    let lowered = description.to_lowercase();

    CLASSIFICATION_TABLE
        .iter()
        .find(|(phrase, _)| lowered.contains(phrase))
        .map(|(_, class)| *class)
        .unwrap_or(FailureClass::Unknown)
}

/// The phrase that decided a classification, for logging
pub fn matching_phrase(description: &str) -> Option<&'static str> {
    let lowered = description.to_lowercase();

    CLASSIFICATION_TABLE
        .iter()
        .find(|(phrase, _)| lowered.contains(phrase))
        .map(|(phrase, _)| *phrase)
}
