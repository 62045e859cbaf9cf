//! 計装実行用のスタック

use crate::memory::page_size;
use crate::Result;
use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// スタック先頭のアライメント
const STACK_ALIGN: u64 = 16;

/// 計装された関数呼び出しに使う実行スタック
///
/// 匿名マッピングで確保し、読み書き可能に保護を設定してから返します。
/// 保護の設定に失敗した場合は確保したマッピングを即座に解放します。
/// Drop 時に必ず解放されます。
#[derive(Debug)]
pub struct ExecutionStack {
    base: NonNull<c_void>,
    size: usize,
}

impl ExecutionStack {
    /// 実行スタックを確保する
    ///
    /// サイズはページサイズの倍数に切り上げられます。
    pub fn allocate(size: usize) -> Result<Self> {
        let page = page_size().unwrap_or(4096);
        let size = size
            .checked_add(page - 1)
            .map(|s| s & !(page - 1))
            .ok_or_else(|| anyhow::anyhow!("Execution stack size overflows: 0x{:x}", size))?;
        let length = NonZeroUsize::new(size)
            .ok_or_else(|| anyhow::anyhow!("Execution stack size must be non-zero"))?;

        // SAFETY: 新しい匿名マッピングを作るだけで、既存のメモリには触れない
        let base = unsafe {
            mmap_anonymous(None, length, ProtFlags::PROT_NONE, MapFlags::MAP_PRIVATE)
        }
        .map_err(|e| anyhow::anyhow!("Failed to map execution stack of 0x{:x} bytes: {}", size, e))?;

        // SAFETY: base は直前に確保した size バイトのマッピング
        let protected = unsafe { mprotect(base, size, ProtFlags::PROT_READ | ProtFlags::PROT_WRITE) };
        if let Err(e) = protected {
            // SAFETY: 同上。まだ誰にも渡していない
            if let Err(unmap_err) = unsafe { munmap(base, size) } {
                warn!("Failed to unmap execution stack at {:p}: {}", base, unmap_err);
            }
            return Err(anyhow::anyhow!("Failed to protect execution stack at {:p}: {}", base, e));
        }

        debug!("Allocated execution stack at {:p} (0x{:x} bytes)", base, size);
        Ok(Self { base, size })
    }

    /// スタック領域の開始アドレス
    pub fn base(&self) -> u64 {
        self.base.as_ptr() as u64
    }

    /// スタック領域のサイズ
    pub fn size(&self) -> usize {
        self.size
    }

    /// スタックの初期位置（領域の末尾、16バイト境界）
    pub fn top(&self) -> u64 {
        (self.base() + self.size as u64) & !(STACK_ALIGN - 1)
    }
}

impl Drop for ExecutionStack {
    fn drop(&mut self) {
        // SAFETY: base/size は allocate で確保したマッピングそのもの
        match unsafe { munmap(self.base, self.size) } {
            Ok(()) => debug!("Released execution stack at {:p}", self.base),
            Err(e) => warn!("Failed to unmap execution stack at {:p}: {}", self.base, e),
        }
    }
}
