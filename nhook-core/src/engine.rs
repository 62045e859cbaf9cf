//! 計装エンジンとの境界
//!
//! 動的バイナリ計装（DBI）エンジン本体は外部から供給されます。
//! ここではセッションが必要とする操作と、エンジンが渡してくる解析結果の型だけを定義します。

use crate::observer::InstructionObserver;
use crate::TraceError;
use nhook_target::{Architecture, ExecutionStack};

/// コールバックがエンジンに返す指示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAction {
    /// 実行を継続する
    Continue,
    /// 実行を停止する
    Stop,
}

/// オペランドのレジスタアクセス方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterAccess {
    None,
    Read,
    Write,
    ReadWrite,
}

impl RegisterAccess {
    /// 読み取りを含むか
    pub fn is_read(self) -> bool {
        matches!(self, RegisterAccess::Read | RegisterAccess::ReadWrite)
    }

    /// 書き込みを含むか
    pub fn is_write(self) -> bool {
        matches!(self, RegisterAccess::Write | RegisterAccess::ReadWrite)
    }
}

/// オペランドの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Invalid,
    Immediate,
    /// 汎用レジスタ
    Gpr,
    /// 浮動小数点レジスタ
    Fpr,
    Segment,
}

/// 命令のオペランド
#[derive(Debug, Clone)]
pub struct Operand {
    pub kind: OperandKind,
    pub access: RegisterAccess,
    /// レジスタ名（レジスタオペランドの場合）
    pub reg_name: Option<String>,
    /// レジスタ状態のスロット番号（対応するスロットが無ければ None）
    pub reg_ctx_idx: Option<usize>,
}

impl Operand {
    /// 汎用レジスタのオペランドを作成する
    pub fn gpr(name: &str, ctx_idx: usize, access: RegisterAccess) -> Self {
        Self {
            kind: OperandKind::Gpr,
            access,
            reg_name: Some(name.to_string()),
            reg_ctx_idx: Some(ctx_idx),
        }
    }

    /// 即値のオペランドを作成する
    pub fn immediate() -> Self {
        Self {
            kind: OperandKind::Immediate,
            access: RegisterAccess::None,
            reg_name: None,
            reg_ctx_idx: None,
        }
    }
}

/// 実行中の命令の解析結果（エンジンが提供する読み取り専用ビュー）
#[derive(Debug, Clone)]
pub struct InstAnalysis {
    pub address: u64,
    /// エンジン自身が解決したシンボル名
    pub symbol: Option<String>,
    /// シンボル先頭からのオフセット
    pub symbol_offset: u64,
    pub disassembly: String,
    pub operands: Vec<Operand>,
}

/// メモリアクセスの方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAccessKind {
    Read,
    Write,
    ReadWrite,
}

impl MemoryAccessKind {
    /// ログ出力用のタグ
    pub fn tag(self) -> &'static str {
        match self {
            MemoryAccessKind::Read => "r",
            MemoryAccessKind::Write => "w",
            MemoryAccessKind::ReadWrite => "rw",
        }
    }
}

/// 1回のメモリアクセスの記録
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub kind: MemoryAccessKind,
    pub address: u64,
    pub size: usize,
    /// 観測された値
    pub value: u64,
}

/// エンジンの動作オプション
///
/// いずれも計装の忠実度に関するもので、トレースの意味には影響しません。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// 排他モニタ（LDXR/STXR）のローカル追跡を無効化する
    pub disable_local_monitor: bool,
    /// ポインタ認証（PAuth）のチェックを回避する
    pub bypass_pauth: bool,
    /// 分岐ターゲット識別（BTI）を有効化する
    pub enable_bti: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            disable_local_monitor: true,
            bypass_pauth: true,
            enable_bti: true,
        }
    }
}

/// 計装実行に使うスタック領域
pub trait StackRegion {
    /// スタックポインタの初期値
    fn top(&self) -> u64;
}

impl StackRegion for ExecutionStack {
    fn top(&self) -> u64 {
        ExecutionStack::top(self)
    }
}

/// 外部の計装エンジン
///
/// コールバックは call に渡すオブザーバとして登録され、
/// 命令ごとに before → 命令実行 → after → memory_access の順で同じスレッド上から呼ばれます。
pub trait InstrumentationEngine {
    /// 対象アーキテクチャ
    type Arch: Architecture;
    /// allocate_stack が返すスタック。Drop で解放されること
    type Stack: StackRegion;

    /// エンジンのレジスタ状態を取得する
    fn gpr_state(&self) -> &<Self::Arch as Architecture>::State;

    /// エンジンのレジスタ状態を可変参照で取得する
    fn gpr_state_mut(&mut self) -> &mut <Self::Arch as Architecture>::State;

    /// エンジンのオプションを設定する
    fn set_options(&mut self, options: EngineOptions);

    /// 記録するメモリアクセスの種類を設定する
    fn record_memory_access(&mut self, kind: MemoryAccessKind) -> bool;

    /// 指定アドレスを含むモジュールを計装対象にする
    fn add_instrumented_module_from_addr(&mut self, address: u64) -> bool;

    /// 実行スタックを確保する
    fn allocate_stack(&mut self, size: usize) -> Result<Self::Stack, TraceError>;

    /// 計装下で関数を呼び出し、戻り値を返す
    ///
    /// 引数は事前に設定したレジスタ状態で渡されます。
    fn call(
        &mut self,
        target: u64,
        observer: &mut dyn InstructionObserver<<Self::Arch as Architecture>::State>,
    ) -> Result<u64, TraceError>;
}

/// mmap による実行スタックを確保する
///
/// 実エンジンの allocate_stack 実装はこのヘルパーで ExecutionStack を確保し、
/// そのまま（または生存管理用のラッパーに包んで）StackRegion として返します。
pub fn allocate_execution_stack(size: usize) -> Result<ExecutionStack, TraceError> {
    ExecutionStack::allocate(size).map_err(|e| TraceError::ResourceExhaustion {
        size,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_access_direction() {
        assert!(RegisterAccess::Read.is_read());
        assert!(!RegisterAccess::Read.is_write());
        assert!(RegisterAccess::ReadWrite.is_read());
        assert!(RegisterAccess::ReadWrite.is_write());
        assert!(!RegisterAccess::None.is_read());
        assert!(!RegisterAccess::None.is_write());
    }

    #[test]
    fn test_memory_access_tags() {
        assert_eq!(MemoryAccessKind::Read.tag(), "r");
        assert_eq!(MemoryAccessKind::Write.tag(), "w");
        assert_eq!(MemoryAccessKind::ReadWrite.tag(), "rw");
    }

    #[test]
    fn test_allocate_execution_stack() {
        let stack = allocate_execution_stack(0x4000).unwrap();
        assert!(StackRegion::top(&stack) > stack.base());

        let err = allocate_execution_stack(0).unwrap_err();
        assert!(matches!(err, TraceError::ResourceExhaustion { size: 0, .. }));
    }
}
