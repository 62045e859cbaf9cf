//! nhook ターゲットプロセスの低レベル機能
//!
//! このクレートは、トレース対象プロセスを観測するための低レベル機能を提供します。
//! アドレスの有効性チェック、/proc/pid/maps の解析、レジスタコンテキストの変換、
//! 実行スタックの確保、バイト列検索などを行います。

pub mod memory;
pub mod maps;
pub mod registers;
pub mod stack;
pub mod search;

pub use memory::{is_printable_text, is_valid_address, Memory, MemoryProbe};
pub use maps::{MapIndex, MemoryRange};
pub use registers::{Aarch64, Architecture, GprContext, NativeArch, X86_64};
pub use stack::ExecutionStack;
pub use search::{search_bytes, search_hex, Pattern};

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
