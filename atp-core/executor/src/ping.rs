//! ping 输出解析

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// ping 统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingSummary {
    pub transmitted: u64,
    pub received: u64,
}

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) packets transmitted, (\d+) (?:packets )?received").expect("ping 统计正则为常量")
});

impl PingSummary {
    /// 解析 iputils / busybox 的统计行, 取最后一次出现
    pub fn parse(output: &str) -> Option<Self> {
        let caps = SUMMARY_RE.captures_iter(output).last()?;
        Some(Self {
            transmitted: caps[1].parse().ok()?,
            received: caps[2].parse().ok()?,
        })
    }

    pub fn lost(&self) -> u64 {
        self.transmitted.saturating_sub(self.received)
    }
}

/// `ping` 参数
pub fn ping_args(target: &str, interval: f64, count: Option<u64>) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(count) = count {
        args.push("-c".to_string());
        args.push(count.to_string());
    }
    args.extend([
        "-i".to_string(),
        interval.to_string(),
        "-W".to_string(),
        "1".to_string(),
        target.to_string(),
    ]);
    args
}
