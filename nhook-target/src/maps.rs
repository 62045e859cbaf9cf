//! /proc/pid/maps の解析とアドレス解決

use crate::Result;
use std::collections::HashMap;
use std::fs;
use tracing::debug;

/// マッピングされたメモリ領域
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
    /// パス名のファイル名部分（匿名マッピングの場合は空文字列）
    pub name: String,
    /// パス名全体
    pub path: String,
}

impl MemoryRange {
    /// アドレスがこの範囲に含まれるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// 範囲のサイズ
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// maps の1行をパースする
    ///
    /// フォーマット: "start-end perms offset dev inode [pathname]"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut rest = line.trim_start();
        let mut fields = Vec::with_capacity(5);
        for _ in 0..5 {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            if end == 0 {
                return None;
            }
            fields.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }

        let (start, end) = fields[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        if end <= start {
            return None;
        }

        let path = rest.trim_end().to_string();
        let name = match path.rfind('/') {
            Some(pos) => path[pos + 1..].to_string(),
            None => path.clone(),
        };

        Some(Self {
            start,
            end,
            name,
            path,
        })
    }
}

/// プロセスのメモリマップ索引
///
/// maps を一度だけ読み込み、アドレスから "module[0xoffset]" 形式の位置文字列を解決します。
/// 解決結果はキャッシュされ、見つからなかった場合も空文字列としてキャッシュします。
/// 索引はトレースセッションごとに所有され、セッション終了時に破棄されます。
#[derive(Debug, Default)]
pub struct MapIndex {
    /// maps ファイルの出現順の領域リスト
    ranges: Vec<MemoryRange>,
    /// アドレス -> 位置文字列のキャッシュ
    cache: HashMap<u64, String>,
    /// 線形探索を行った回数
    scans: usize,
}

impl MapIndex {
    /// 空の索引を作成する
    pub fn new() -> Self {
        Self::default()
    }

    /// 自プロセスの /proc/self/maps から索引を作成する
    pub fn load() -> Result<Self> {
        Self::load_path("/proc/self/maps")
    }

    /// 指定プロセスの /proc/pid/maps から索引を作成する
    pub fn load_pid(pid: i32) -> Result<Self> {
        Self::load_path(&format!("/proc/{}/maps", pid))
    }

    fn load_path(maps_path: &str) -> Result<Self> {
        let content = fs::read_to_string(maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", maps_path, e))?;
        let index = Self::from_maps(&content);
        debug!("Loaded {} memory ranges from {}", index.ranges.len(), maps_path);
        Ok(index)
    }

    /// maps 形式のテキストから索引を作成する
    ///
    /// パースできない行は読み飛ばします。
    pub fn from_maps(content: &str) -> Self {
        let ranges = content.lines().filter_map(MemoryRange::parse_line).collect();
        Self {
            ranges,
            cache: HashMap::new(),
            scans: 0,
        }
    }

    /// すべての領域を取得する
    pub fn ranges(&self) -> &[MemoryRange] {
        &self.ranges
    }

    /// アドレスを含む最初の領域を取得する
    pub fn find_range(&self, address: u64) -> Option<&MemoryRange> {
        self.ranges.iter().find(|r| r.contains(address))
    }

    /// アドレスを "module[0xoffset]" 形式に解決する
    ///
    /// どの領域にも含まれない場合は空文字列を返します。
    pub fn resolve(&mut self, address: u64) -> &str {
        if !self.cache.contains_key(&address) {
            self.scans += 1;
            let location = self
                .find_range(address)
                .map(|r| format!("{}[0x{:x}]", r.name, address - r.start))
                .unwrap_or_default();
            self.cache.insert(address, location);
        }
        self.cache.get(&address).map(String::as_str).unwrap_or_default()
    }

    /// キャッシュ済みのアドレス数
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// キャッシュミスによる線形探索の回数
    pub fn scans(&self) -> usize {
        self.scans
    }

    /// ファイル名が一致する最初の領域の開始アドレス（モジュールのベースアドレス）を取得する
    pub fn base_of(&self, file_name: &str) -> Option<u64> {
        self.ranges
            .iter()
            .find(|r| !r.name.is_empty() && r.name == file_name)
            .map(|r| r.start)
    }

    /// パス名に soname を含む最初の領域のフルパスを取得する
    pub fn find_path(&self, soname: &str) -> Option<&str> {
        self.ranges
            .iter()
            .find(|r| r.path.contains(soname))
            .map(|r| r.path.as_str())
    }

    /// パス名に soname を含む最初の領域の (開始アドレス, サイズ) を取得する
    pub fn module_info(&self, soname: &str) -> Option<(u64, u64)> {
        self.ranges
            .iter()
            .find(|r| r.path.contains(soname))
            .map(|r| (r.start, r.size()))
    }
}
