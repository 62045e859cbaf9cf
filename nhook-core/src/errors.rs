//! トレースのエラー型

use crate::hook::HookState;
use crate::session::SessionState;
use std::path::PathBuf;
use thiserror::Error;

/// トレースセッションのエラー
///
/// シンボル解決や表示の失敗はエラーにせず、粗い出力に劣化させます。
/// ここに挙げるのはセッションを中断するものだけです。
#[derive(Error, Debug)]
pub enum TraceError {
    /// 実行スタックの確保または保護設定に失敗した
    #[error("Failed to allocate execution stack of 0x{size:x} bytes: {reason}")]
    ResourceExhaustion { size: usize, reason: String },

    #[error("No symbol matching '{symbol}' in {module}")]
    UnresolvedSymbol { module: String, symbol: String },

    #[error("Failed to instrument the module containing 0x{0:x}")]
    ModuleNotInstrumented(u64),

    /// 計装エンジンが捕捉したフォールト
    #[error("Instrumented call to 0x{address:x} faulted: {reason}")]
    EngineFault { address: u64, reason: String },

    #[error("Failed to install hook at 0x{address:x}: {reason}")]
    HookInstallFailed { address: u64, reason: String },

    #[error("Cannot {action} hook at 0x{address:x} in state {state:?}")]
    InvalidHookTransition {
        address: u64,
        action: &'static str,
        state: HookState,
    },

    /// 実行済み（または中断済み）のセッションを再実行しようとした
    #[error("Session for 0x{target:x} cannot run again in state {state:?}")]
    InvalidSessionState { target: u64, state: SessionState },

    #[error("Data directory is not configured (set NHOOK_DATA_DIR)")]
    DataDirUnavailable,

    #[error("Failed to write trace log to {path:?}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
