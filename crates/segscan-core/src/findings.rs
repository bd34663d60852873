//! 命中项合并与输出
use anyhow::Result;
use rayon::prelude::*;
use std::io::Write;

use crate::source::UnitDescriptor;
use crate::types::{Match, OutputItem};

/// 合并各单元的私有命中列表
///
/// 先按单元枚举顺序拼接，再按地址升序做稳定排序：同地址的命中保持枚举顺序。
/// 结果只取决于各单元的输入，与作业完成顺序和线程数无关。
pub fn merge_unit_matches<I>(per_unit: I) -> Vec<Match>
where
    I: IntoIterator<Item = Vec<Match>>,
{
    let mut merged: Vec<Match> = Vec::new();
    for mut unit in per_unit {
        merged.append(&mut unit);
    }
    merged.par_sort_by_key(|m| m.address);
    merged
}

/// 将命中以 JSON 数组流式写入 `out`；单元名按地址归属查找
pub fn write_matches_json(out: &mut dyn Write, matches: &[Match], units: &[UnitDescriptor]) -> Result<usize> {
    // 按起始地址排序一次，逐条命中二分查找所属单元
    let mut by_start: Vec<&UnitDescriptor> = units.iter().collect();
    by_start.sort_by_key(|u| u.start);

    write!(out, "[")?;
    let mut first = true;
    for m in matches {
        let unit = unit_name_at(&by_start, m.address).unwrap_or("?????");
        let item = OutputItem {
            address: m.address,
            unit,
            rule: &m.rule.identifier,
            description: m.rule.description.as_deref(),
            tags: &m.rule.tags,
            namespace: &m.rule.namespace,
        };
        if !first { write!(out, ",")?; } else { first = false; }
        serde_json::to_writer(&mut *out, &item)?;
    }
    write!(out, "]")?;
    Ok(matches.len())
}

fn unit_name_at<'a>(by_start: &[&'a UnitDescriptor], address: u64) -> Option<&'a str> {
    let idx = by_start.partition_point(|u| u.start <= address);
    let unit: &'a UnitDescriptor = by_start.get(idx.checked_sub(1)?).copied()?;
    unit.contains(address).then_some(unit.name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::UnitKind;
    use crate::types::Rule;
    use std::sync::Arc;

    fn matches(rule: &Arc<Rule>, addrs: &[u64]) -> Vec<Match> {
        addrs.iter().map(|&address| Match { rule: Arc::clone(rule), address }).collect()
    }

    #[test]
    fn test_merge_sorts_by_address() {
        let r = Arc::new(Rule::new("r"));
        let merged = merge_unit_matches(vec![matches(&r, &[50, 10, 30]), matches(&r, &[20, 40])]);
        let addrs: Vec<u64> = merged.iter().map(|m| m.address).collect();
        assert_eq!(addrs, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_merge_ties_keep_enumeration_order() {
        let a = Arc::new(Rule::new("a"));
        let b = Arc::new(Rule::new("b"));
        let c = Arc::new(Rule::new("c"));
        let merged = merge_unit_matches(vec![matches(&b, &[7]), matches(&a, &[3, 7]), matches(&c, &[7, 1])]);

        let ids: Vec<(&str, u64)> = merged.iter().map(|m| (m.rule.identifier.as_str(), m.address)).collect();
        assert_eq!(ids, vec![("c", 1), ("a", 3), ("b", 7), ("a", 7), ("c", 7)]);
    }

    fn unit(index: usize, name: &str, start: u64, size: u64) -> UnitDescriptor {
        UnitDescriptor {
            index,
            name: name.to_string(),
            class: "DATA".to_string(),
            kind: UnitKind::Data,
            start,
            size,
        }
    }

    #[test]
    fn test_unit_lookup_handles_unsorted_units_and_gaps() {
        let units = vec![unit(0, "high", 0x3000, 0x10), unit(1, "low", 0x1000, 0x100), unit(2, "mid", 0x2000, 0x20)];
        let mut by_start: Vec<&UnitDescriptor> = units.iter().collect();
        by_start.sort_by_key(|u| u.start);

        assert_eq!(unit_name_at(&by_start, 0x1000), Some("low"));
        assert_eq!(unit_name_at(&by_start, 0x10ff), Some("low"));
        assert_eq!(unit_name_at(&by_start, 0x1100), None);
        assert_eq!(unit_name_at(&by_start, 0x201f), Some("mid"));
        assert_eq!(unit_name_at(&by_start, 0x3008), Some("high"));
        assert_eq!(unit_name_at(&by_start, 0x10), None);
        assert_eq!(unit_name_at(&by_start, 0x3010), None);
    }

    #[test]
    fn test_write_matches_json_resolves_unit_names() {
        let mut rule = Rule::new("mz");
        rule.description = Some("DOS header".to_string());
        rule.tags = vec!["pe".to_string()];
        let rule = Arc::new(rule);
        let units = vec![UnitDescriptor {
            index: 0,
            name: ".text".to_string(),
            class: "CODE".to_string(),
            kind: UnitKind::Code,
            start: 0x1000,
            size: 0x100,
        }];

        let mut out = Vec::new();
        let n = write_matches_json(&mut out, &matches(&rule, &[0x1010, 0x9000]), &units).unwrap();
        assert_eq!(n, 2);

        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v[0]["unit"], ".text");
        assert_eq!(v[0]["address"], 0x1010);
        assert_eq!(v[0]["description"], "DOS header");
        assert_eq!(v[1]["unit"], "?????");
    }
}
