//! メモリアクセス機能
//!
//! トレース中にレジスタ値が指すメモリを表示するための機能です。
//! ホストプロセスをクラッシュさせないよう、ポインタを直接デリファレンスせず、
//! mincore によるページ常駐チェックと /proc/pid/mem 経由の読み取りだけを使います。

use crate::Result;
use nix::unistd::{sysconf, Pid, SysconfVar};
use std::fs::File;
use std::os::unix::fs::FileExt;

/// 印字可能なASCIIの下限
const PRINTABLE_MIN: u8 = 0x20;
/// 印字可能なASCIIの上限
const PRINTABLE_MAX: u8 = 0x7E;

/// システムのページサイズを取得する
pub fn page_size() -> Option<usize> {
    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => Some(size as usize),
        _ => None,
    }
}

/// アドレスが常駐しているメモリページ上にあるかチェックする
///
/// アドレスを含むページに対して mincore を発行し、成功した場合のみ true を返します。
/// ページサイズの取得失敗や未マッピング領域はすべて false になります。
pub fn is_valid_address(address: u64) -> bool {
    let page_size = match page_size() {
        Some(size) => size,
        None => return false,
    };

    let aligned = (address as usize) & !(page_size - 1);
    let mut vec: nix::libc::c_uchar = 0;

    // SAFETY: mincore はページテーブルを問い合わせるだけで、アドレスを参照しない
    let ret = unsafe { nix::libc::mincore(aligned as *mut nix::libc::c_void, 1, &mut vec) };
    ret == 0
}

/// バイト列がASCII印字可能な文字列かどうかを判定する
///
/// 終端文字（NUL）に到達し、それまでに空白以外の印字可能文字が1つ以上あり、
/// 印字不可能なバイトが1つも無い場合のみ true を返します。
/// 終端文字が見つからないまま末尾に達した場合は false です。
pub fn is_printable_text(data: &[u8]) -> bool {
    let mut has_non_space = false;

    for &byte in data {
        if byte == 0 {
            return has_non_space;
        }
        if !(PRINTABLE_MIN..=PRINTABLE_MAX).contains(&byte) {
            return false;
        }
        if byte != b' ' {
            has_non_space = true;
        }
    }

    false
}

/// メモリ内容を安全に覗くためのトレイト
///
/// セッションはこのトレイト経由でレジスタ値の指す先を読み取ります。
pub trait MemoryProbe {
    /// アドレスが有効なメモリ上にあるか
    fn is_valid_address(&self, addr: u64) -> bool;

    /// 指定アドレスから size バイト読み取る
    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>>;

    /// NUL終端まで、最大 max_len バイト読み取る
    ///
    /// ページ境界ごとに読み取り、読めなくなった時点で打ち切ります。
    /// 終端が見つかった場合は終端のNULも結果に含めます。
    fn read_until_nul(&self, addr: u64, max_len: usize) -> Vec<u8> {
        let page = page_size().unwrap_or(4096) as u64;
        let mut out = Vec::with_capacity(max_len.min(256));
        let mut cursor = addr;

        while out.len() < max_len {
            let to_page_end = (page - cursor % page) as usize;
            let chunk = to_page_end.min(max_len - out.len());
            let bytes = match self.read(cursor, chunk) {
                Ok(bytes) => bytes,
                Err(_) => break,
            };

            if let Some(pos) = bytes.iter().position(|&b| b == 0) {
                out.extend_from_slice(&bytes[..=pos]);
                break;
            }
            out.extend_from_slice(&bytes);
            cursor += chunk as u64;
        }

        out
    }
}

/// /proc/pid/mem 経由のメモリアクセス
///
/// 未マッピング領域の読み取りは EIO エラーになるだけで、シグナルは発生しません。
pub struct Memory {
    pid: Pid,
    file: File,
}

impl Memory {
    /// 指定プロセスのメモリを開く
    pub fn open(pid: i32) -> Result<Self> {
        let mem_path = format!("/proc/{}/mem", pid);
        let file = File::open(&mem_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", mem_path, e))?;

        Ok(Self {
            pid: Pid::from_raw(pid),
            file,
        })
    }

    /// 自プロセスのメモリを開く
    pub fn current() -> Result<Self> {
        Self::open(std::process::id() as i32)
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    /// メモリからデータを読み取る
    pub fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.file
            .read_exact_at(&mut buffer, addr)
            .map_err(|e| anyhow::anyhow!("Failed to read {} bytes at 0x{:x}: {}", size, addr, e))?;
        Ok(buffer)
    }

    /// u64値を読み取る（リトルエンディアン）
    pub fn read_u64(&self, addr: u64) -> Result<u64> {
        let bytes = self.read(addr, 8)?;
        let array: [u8; 8] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("Failed to convert bytes to u64 array (expected 8 bytes)"))?;
        Ok(u64::from_le_bytes(array))
    }
}

impl MemoryProbe for Memory {
    fn is_valid_address(&self, addr: u64) -> bool {
        // mincore は自プロセスにしか使えない
        if self.pid.as_raw() as u32 == std::process::id() {
            is_valid_address(addr)
        } else {
            self.read(addr, 1).is_ok()
        }
    }

    fn read(&self, addr: u64, size: usize) -> Result<Vec<u8>> {
        self.read(addr, size)
    }
}
