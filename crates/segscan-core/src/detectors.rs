//! 匹配引擎接口与基于 `regex::bytes` 的默认实现
use std::path::Path;
use std::sync::Arc;

use crate::error::RuleError;
use crate::rules::{load_rule_specs, RuleSpec};
use crate::types::Rule;
use crate::unit::UnitScan;

/// 匹配引擎：在单元快照上运行规则，把命中与消息写入单元私有上下文
///
/// 在工作线程上调用，不得访问任何宿主接口。
pub trait Matcher: Send + Sync {
    fn scan(&self, bytes: &[u8], unit: &mut UnitScan) -> anyhow::Result<()>;
}

/// 字节级正则检测器集合
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    detectors: Vec<(Arc<Rule>, regex::bytes::Regex)>,
}

impl RegexMatcher {
    /// 从规则文件构建；命名空间取规则文件路径
    pub fn from_rules_file(path: &Path) -> Result<Self, RuleError> {
        let specs = load_rule_specs(path)?;
        Self::from_specs(&specs, &path.to_string_lossy())
    }

    /// 从 TOML 文本构建（嵌入与测试用）
    pub fn from_toml(txt: &str, namespace: &str) -> Result<Self, RuleError> {
        let specs = crate::rules::parse_rule_specs(txt)?;
        Self::from_specs(&specs, namespace)
    }

    pub(crate) fn from_specs(specs: &[RuleSpec], namespace: &str) -> Result<Self, RuleError> {
        let mut detectors = Vec::with_capacity(specs.len());
        for s in specs {
            let rx = regex::bytes::Regex::new(&s.pat)
                .map_err(|source| RuleError::InvalidPattern { id: s.id.clone(), source })?;
            let rule = Rule {
                identifier: s.id.clone(),
                description: s.description.clone(),
                tags: s.tags.clone(),
                namespace: namespace.to_string(),
            };
            detectors.push((Arc::new(rule), rx));
        }
        if detectors.is_empty() {
            return Err(RuleError::Empty);
        }
        Ok(Self { detectors })
    }

    pub fn rule_count(&self) -> usize {
        self.detectors.len()
    }
}

impl Matcher for RegexMatcher {
    fn scan(&self, bytes: &[u8], unit: &mut UnitScan) -> anyhow::Result<()> {
        for (rule, re) in &self.detectors {
            // 若存在第1个捕获组，则以其起点为命中地址；否则取整个匹配
            for caps in re.captures_iter(bytes) {
                let start = match caps.get(1).or_else(|| caps.get(0)) {
                    Some(m) => m.start(),
                    None => continue,
                };
                unit.record(rule, start);
            }
        }
        Ok(())
    }
}
