//! 扫描单元枚举与字节快照
//!
//! 单元是一段连续的可寻址输入区间，每个单元对应一个扫描作业。
//! 宿主通过 `UnitSource` 提供单元列表与快照读取；这里另提供两个实现：
//! - `MemoryUnits`：内存中的单元（嵌入与测试用）
//! - `FileUnits`：把目录下的每个文件当作一个单元，按页对齐依次排布地址
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 单元类型；部分类型只有引用/占位语义，扫描时跳过
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitKind {
    Code,
    Data,
    Bss,
    /// 外部引用（导入表、符号链接等）
    External,
    Group,
    Null,
    Undefined,
    AbsoluteSymbols,
    Common,
    InternalMemory,
}

impl UnitKind {
    /// 空或仅含引用的类型不参与扫描
    pub fn is_excluded(self) -> bool {
        matches!(
            self,
            UnitKind::External
                | UnitKind::Group
                | UnitKind::Null
                | UnitKind::Undefined
                | UnitKind::AbsoluteSymbols
                | UnitKind::Common
                | UnitKind::InternalMemory
        )
    }
}

/// 单元描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitDescriptor {
    /// 枚举顺序下标
    pub index: usize,
    pub name: String,
    /// 宿主给出的类别字符串（如 CODE / DATA）
    pub class: String,
    pub kind: UnitKind,
    pub start: u64,
    pub size: u64,
}

impl UnitDescriptor {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end()
    }

    /// 是否需要扫描：类型未被排除且长度非零
    pub fn is_scannable(&self) -> bool {
        !self.kind.is_excluded() && self.size > 0
    }
}

/// 宿主的单元枚举与快照接口（只在属主线程上调用）
pub trait UnitSource {
    /// 按枚举顺序返回全部候选单元（含需要跳过的类型）
    fn units(&self) -> Result<Vec<UnitDescriptor>>;

    /// 把单元内容复制到独立缓冲区，作业回调只接触该副本
    fn snapshot(&self, unit: &UnitDescriptor) -> Result<Vec<u8>>;
}

/// 内存单元集合
#[derive(Debug, Default, Clone)]
pub struct MemoryUnits {
    units: Vec<(UnitDescriptor, Vec<u8>)>,
}

impl MemoryUnits {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个单元，长度取自 `bytes`
    pub fn push(&mut self, name: impl Into<String>, kind: UnitKind, start: u64, bytes: Vec<u8>) -> &mut Self {
        let desc = UnitDescriptor {
            index: self.units.len(),
            name: name.into(),
            class: class_for(kind).to_string(),
            kind,
            start,
            size: bytes.len() as u64,
        };
        self.units.push((desc, bytes));
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl UnitSource for MemoryUnits {
    fn units(&self) -> Result<Vec<UnitDescriptor>> {
        Ok(self.units.iter().map(|(d, _)| d.clone()).collect())
    }

    fn snapshot(&self, unit: &UnitDescriptor) -> Result<Vec<u8>> {
        self.units
            .get(unit.index)
            .map(|(_, bytes)| bytes.clone())
            .with_context(|| format!("unknown unit index {}", unit.index))
    }
}

/// 文件单元的起始地址与对齐粒度
pub const FILE_UNITS_BASE: u64 = 0x1000;
pub const FILE_UNITS_ALIGN: u64 = 0x1000;

/// 文件单元集合：每个文件一个单元
#[derive(Debug, Clone)]
pub struct FileUnits {
    units: Vec<(UnitDescriptor, PathBuf)>,
}

impl FileUnits {
    /// 遍历输入路径（文件或目录），按文件名排序以保证地址布局可复现
    ///
    /// - 普通文件 → `Data` 单元（空文件长度为 0，扫描时跳过）
    /// - 符号链接 → `External` 单元（仅引用，不跟随、不扫描）
    pub fn discover(input: &Path) -> Result<Self> {
        let mut units = Vec::new();
        let mut next_start = FILE_UNITS_BASE;

        let walker = WalkDir::new(input).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {}", input.display()))?;
            let ft = entry.file_type();
            if !(ft.is_file() || ft.is_symlink()) {
                continue;
            }

            let name = entry
                .path()
                .strip_prefix(input)
                .ok()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| entry.path())
                .to_string_lossy()
                .into_owned();

            let (kind, size) = if ft.is_symlink() {
                (UnitKind::External, 0)
            } else {
                let md = entry.metadata().with_context(|| format!("stat {}", entry.path().display()))?;
                (UnitKind::Data, md.len())
            };

            let desc = UnitDescriptor {
                index: units.len(),
                name,
                class: class_for(kind).to_string(),
                kind,
                start: next_start,
                size,
            };
            next_start = align_up(desc.end(), FILE_UNITS_ALIGN).max(next_start + FILE_UNITS_ALIGN);
            units.push((desc, entry.into_path()));
        }

        Ok(Self { units })
    }

    pub fn path_of(&self, unit: &UnitDescriptor) -> Option<&Path> {
        self.units.get(unit.index).map(|(_, p)| p.as_path())
    }
}

impl UnitSource for FileUnits {
    fn units(&self) -> Result<Vec<UnitDescriptor>> {
        Ok(self.units.iter().map(|(d, _)| d.clone()).collect())
    }

    fn snapshot(&self, unit: &UnitDescriptor) -> Result<Vec<u8>> {
        let path = self.path_of(unit).with_context(|| format!("unknown unit index {}", unit.index))?;
        let mut bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        // 文件在枚举后被改写时，以枚举时的长度为准
        bytes.resize(unit.size as usize, 0);
        Ok(bytes)
    }
}

fn class_for(kind: UnitKind) -> &'static str {
    match kind {
        UnitKind::Code => "CODE",
        UnitKind::Data => "DATA",
        UnitKind::Bss => "BSS",
        UnitKind::External => "XTRN",
        _ => "",
    }
}

fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align).saturating_mul(align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_kinds_are_not_scannable() {
        let mut units = MemoryUnits::new();
        units
            .push(".text", UnitKind::Code, 0x1000, vec![1, 2, 3])
            .push(".idata", UnitKind::External, 0x2000, vec![0; 8])
            .push(".bss", UnitKind::Bss, 0x3000, vec![0; 4])
            .push(".empty", UnitKind::Data, 0x4000, Vec::new());

        let scannable: Vec<String> =
            units.units().unwrap().into_iter().filter(|u| u.is_scannable()).map(|u| u.name).collect();
        assert_eq!(scannable, vec![".text", ".bss"]);
    }

    #[test]
    fn test_memory_snapshot_is_an_owned_copy() {
        let mut units = MemoryUnits::new();
        units.push("a", UnitKind::Data, 0x10, b"hello".to_vec());
        let desc = &units.units().unwrap()[0];
        assert_eq!(desc.end(), 0x15);
        assert!(desc.contains(0x14));
        assert!(!desc.contains(0x15));
        assert_eq!(units.snapshot(desc).unwrap(), b"hello");
    }

    #[test]
    fn test_file_units_layout_is_sorted_and_page_aligned() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.bin"), vec![0u8; 0x1800]).unwrap();
        fs::write(dir.path().join("a.bin"), b"abc").unwrap();
        fs::write(dir.path().join("c.bin"), b"").unwrap();

        let units = FileUnits::discover(dir.path()).unwrap();
        let list = units.units().unwrap();
        let names: Vec<&str> = list.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a.bin", "b.bin", "c.bin"]);
        assert_eq!(list[0].start, FILE_UNITS_BASE);
        assert_eq!(list[1].start, 0x2000);
        assert_eq!(list[2].start, 0x4000);
        assert!(!list[2].is_scannable());
        assert_eq!(units.snapshot(&list[0]).unwrap(), b"abc");
    }

    #[test]
    fn test_single_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        fs::write(&path, b"xyz").unwrap();

        let units = FileUnits::discover(&path).unwrap();
        let list = units.units().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].size, 3);
        assert!(list[0].name.ends_with("image.bin"));
    }
}
