//! nhook ELF シンボル解析
//!
//! このクレートは、ディスク上のモジュール（ELFファイル）のシンボルテーブルを解析し、
//! シンボル名から実行時アドレスを解決する機能を提供します。

pub mod loader;
pub mod symbols;

pub use loader::ModuleImage;
pub use symbols::{ModuleSymbolResolver, Symbol, SymbolTable};

/// ELF解析の結果型
pub type Result<T> = anyhow::Result<T>;
