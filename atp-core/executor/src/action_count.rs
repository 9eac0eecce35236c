//! 动作序列
//!
//! 文本格式: `name[:count]`, 逗号分隔, 例如 `reboot,live_migrate:3,shelve`。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{ExecutorError, Result};

/// 相邻同名动作的合并方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// 次数相加: `reboot:2,reboot:3` 等价于 `reboot:5`
    #[default]
    Sum,
    /// 视为重复输入, 保留前一项: `reboot:2,reboot:3` 等价于 `reboot:2`
    Collapse,
}

/// 单个动作及其重复次数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCount {
    pub name: String,
    pub count: u32,
}

impl fmt::Display for ActionCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 1 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.name, self.count)
        }
    }
}

/// 有序的动作序列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCountList {
    items: Vec<ActionCount>,
}

impl ActionCountList {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按指定合并方式解析
    pub fn parse_with(input: &str, policy: MergePolicy) -> Result<Self> {
        let mut list = Self::new();
        let tokens: Vec<&str> = input.split(',').map(str::trim).collect();
        let last = tokens.len().saturating_sub(1);

        for (i, token) in tokens.into_iter().enumerate() {
            if token.is_empty() {
                // 允许末尾多一个逗号
                if i == last && i > 0 {
                    continue;
                }
                return Err(ExecutorError::Config(format!("动作列表中存在空项: {:?}", input)));
            }

            let (name, count) = match token.split_once(':') {
                Some((name, count)) => {
                    let count: u32 = count.trim().parse().map_err(|_| {
                        ExecutorError::Config(format!("无效的动作次数: {}", token))
                    })?;
                    (name.trim(), count)
                }
                None => (token, 1),
            };

            if name.is_empty() {
                return Err(ExecutorError::Config(format!("动作名称为空: {}", token)));
            }
            if count == 0 {
                return Err(ExecutorError::Config(format!("动作次数必须大于 0: {}", token)));
            }

            list.add_with(name, count, policy);
        }

        Ok(list)
    }

    /// 追加一项, 与最后一项同名时按 [`MergePolicy::Sum`] 合并
    pub fn add(&mut self, name: &str, count: u32) {
        self.add_with(name, count, MergePolicy::Sum);
    }

    /// 追加一项, 与最后一项同名时按 `policy` 合并
    pub fn add_with(&mut self, name: &str, count: u32, policy: MergePolicy) {
        if count == 0 {
            return;
        }
        match self.items.last_mut() {
            Some(last) if last.name == name => match policy {
                MergePolicy::Sum => last.count += count,
                MergePolicy::Collapse => {
                    warn!("忽略重复的动作: {}:{} (保留 {})", name, count, last);
                }
            },
            _ => self.items.push(ActionCount {
                name: name.to_string(),
                count,
            }),
        }
    }

    pub fn items(&self) -> &[ActionCount] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 展开后的执行序列
    pub fn actions(&self) -> Vec<&str> {
        self.items
            .iter()
            .flat_map(|item| std::iter::repeat(item.name.as_str()).take(item.count as usize))
            .collect()
    }

    /// 展开后的动作总数
    pub fn total(&self) -> usize {
        self.items.iter().map(|item| item.count as usize).sum()
    }

    /// 格式化为解析时的文本形式
    pub fn format_actions(&self) -> String {
        self.items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for ActionCountList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_actions())
    }
}

impl FromStr for ActionCountList {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_with(s, MergePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_expand() {
        let list: ActionCountList = "reboot,live_migrate:3,shelve".parse().unwrap();
        assert_eq!(
            list.actions(),
            vec!["reboot", "live_migrate", "live_migrate", "live_migrate", "shelve"]
        );
        assert_eq!(list.total(), 5);
        assert_eq!(list.format_actions(), "reboot,live_migrate:3,shelve");
    }

    #[test]
    fn test_format_round_trip_keeps_counts() {
        let list: ActionCountList = " stop , start:2 ,nop:10,".parse().unwrap();
        assert_eq!(list.to_string(), "stop,start:2,nop:10");
        let again: ActionCountList = list.to_string().parse().unwrap();
        assert_eq!(again, list);
    }

    #[test]
    fn test_sum_merges_consecutive_counts() {
        let list = ActionCountList::parse_with("reboot:2,reboot:3,stop", MergePolicy::Sum).unwrap();
        assert_eq!(list.items().len(), 2);
        assert_eq!(list.items()[0].count, 5);
        assert_eq!(list.format_actions(), "reboot:5,stop");
    }

    #[test]
    fn test_collapse_keeps_first_of_consecutive() {
        let list =
            ActionCountList::parse_with("reboot:2,reboot:3,stop", MergePolicy::Collapse).unwrap();
        assert_eq!(list.format_actions(), "reboot:2,stop");
        assert_eq!(list.total(), 3);
    }

    #[test]
    fn test_non_adjacent_same_name_is_kept() {
        for policy in [MergePolicy::Sum, MergePolicy::Collapse] {
            let list = ActionCountList::parse_with("reboot,stop,reboot", policy).unwrap();
            assert_eq!(list.items().len(), 3);
            assert_eq!(list.actions(), vec!["reboot", "stop", "reboot"]);
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!("reboot:0".parse::<ActionCountList>().is_err());
        assert!("reboot:x".parse::<ActionCountList>().is_err());
        assert!("reboot,,stop".parse::<ActionCountList>().is_err());
        assert!(":3".parse::<ActionCountList>().is_err());
        assert!("".parse::<ActionCountList>().is_err());
    }
}
