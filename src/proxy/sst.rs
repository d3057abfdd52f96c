//! 单一数据源校验
//!
//! 请求中嵌入的「上一回合输出」必须与本层上一次返回的文本逐字节相同。
//! 不一致只标记、记录并上报，请求照常转发，数据不做任何修正。

use serde::{Deserialize, Serialize};

const EXCERPT_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// 首个请求且无已知输出时为 true，计为匹配
    pub first_observed: bool,
    #[serde(rename = "match")]
    pub matched: bool,
    pub expected_len: Option<usize>,
    pub actual_len: usize,
    /// 第一个不同字符的位置（字符偏移）
    pub mismatch_at: Option<usize>,
    pub detail: String,
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        if self.matched {
            "OK"
        } else {
            "VIOLATION"
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SstVerifier {
    last: Option<String>,
}

fn excerpt(s: &str, from: usize) -> String {
    s.chars().skip(from).take(EXCERPT_CHARS).collect()
}

impl SstVerifier {
    /// seed：续跑时从持久化的叙事恢复
    pub fn new(seed: Option<String>) -> Self {
        Self { last: seed }
    }

    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn check(&self, actual: &str) -> Verdict {
        let actual_len = actual.chars().count();
        let Some(expected) = self.last.as_deref() else {
            return Verdict {
                first_observed: true,
                matched: true,
                expected_len: None,
                actual_len,
                mismatch_at: None,
                detail: "First observed turn".to_string(),
            };
        };
        let expected_len = expected.chars().count();
        if expected == actual {
            return Verdict {
                first_observed: false,
                matched: true,
                expected_len: Some(expected_len),
                actual_len,
                mismatch_at: None,
                detail: format!("previous output identical ({} chars)", expected_len),
            };
        }
        let pos = expected
            .chars()
            .zip(actual.chars())
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| expected_len.min(actual_len));
        Verdict {
            first_observed: false,
            matched: false,
            expected_len: Some(expected_len),
            actual_len,
            mismatch_at: Some(pos),
            detail: format!(
                "SST VIOLATION at pos {}. embedded len={}, last output len={}. embedded[{}..]={:?}, last[{}..]={:?}",
                pos,
                actual_len,
                expected_len,
                pos,
                excerpt(actual, pos),
                pos,
                excerpt(expected, pos)
            ),
        }
    }

    /// 记录本层返回的文本（空文本同样记录，叙事按原样替换）
    pub fn record(&mut self, text: &str) {
        self.last = Some(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_counts_as_match() {
        let v = SstVerifier::new(None).check("anything");
        assert!(v.matched);
        assert!(v.first_observed);
    }

    #[test]
    fn test_single_character_difference_is_flagged() {
        let mut sst = SstVerifier::default();
        sst.record("The cat sat on the mat.");
        let ok = sst.check("The cat sat on the mat.");
        assert!(ok.matched);

        let bad = sst.check("The cat sat on the hat.");
        assert!(!bad.matched);
        assert_eq!(bad.mismatch_at, Some(19));
        assert!(bad.detail.contains("\"hat.\""));
        assert!(bad.detail.contains("\"mat.\""));
        assert_eq!(bad.label(), "VIOLATION");
    }

    #[test]
    fn test_prefix_and_superset_are_violations() {
        let mut sst = SstVerifier::new(Some("abc".into()));
        let v = sst.check("abcd");
        assert!(!v.matched);
        assert_eq!(v.mismatch_at, Some(3));
        let v = sst.check("ab");
        assert_eq!(v.mismatch_at, Some(2));

        sst.record("");
        assert!(sst.check("").matched);
        assert!(!sst.check("x").matched);
    }
}
