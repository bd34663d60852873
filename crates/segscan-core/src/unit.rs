//! 单元私有上下文：命中列表与消息队列
//!
//! 每个作业独占自己的 `UnitScan`，完成后通过一次性写入的 `UnitSlot` 交回属主线程，
//! 因此作业之间没有共享的可变状态，也不需要逐作业加锁。
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::types::{Match, Rule};

/// 默认单规则最大命中数（超过后丢弃并告警一次）
pub const DEFAULT_MAX_MATCHES_PER_RULE: usize = 1_000_000;

/// 作业执行期的单元上下文，由匹配引擎填充
#[derive(Debug)]
pub struct UnitScan {
    base: u64,
    max_per_rule: usize,
    verbose: bool,
    matches: Vec<Match>,
    messages: Vec<String>,
    per_rule: HashMap<String, usize>,
}

impl UnitScan {
    pub fn new(base: u64, max_per_rule: usize, verbose: bool) -> Self {
        Self { base, max_per_rule, verbose, matches: Vec::new(), messages: Vec::new(), per_rule: HashMap::new() }
    }

    /// 记录一次命中；`offset` 为单元内偏移
    pub fn record(&mut self, rule: &Arc<Rule>, offset: usize) {
        let count = self.per_rule.entry(rule.identifier.clone()).or_insert(0);
        if *count >= self.max_per_rule {
            if *count == self.max_per_rule {
                *count += 1;
                self.messages.push(format!("* Warning: Rule \"{}\" exceeded max match count *", rule.identifier));
            }
            return;
        }
        *count += 1;
        self.matches.push(Match { rule: Arc::clone(rule), address: self.base.saturating_add(offset as u64) });
    }

    /// 排队一条诊断消息，完成后由属主线程输出
    pub fn message(&mut self, text: impl Into<String>) {
        self.messages.push(text.into());
    }

    /// 引擎的控制台输出，仅在 verbose 模式下保留
    pub fn console(&mut self, text: &str) {
        if self.verbose {
            self.messages.push(format!("Console: \"{text}\""));
        }
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub(crate) fn finish(self, failure: Option<String>) -> UnitOutput {
        UnitOutput { matches: self.matches, messages: self.messages, failure }
    }
}

/// 作业完成后交回的单元结果
#[derive(Debug, Clone, Default)]
pub(crate) struct UnitOutput {
    pub(crate) matches: Vec<Match>,
    pub(crate) messages: Vec<String>,
    pub(crate) failure: Option<String>,
}

/// 一次性写入的结果槽：作业写，属主线程在作业组完成后读
pub(crate) type UnitSlot = Arc<OnceLock<UnitOutput>>;
