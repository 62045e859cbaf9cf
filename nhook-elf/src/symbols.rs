//! シンボル解決機能

use crate::{ModuleImage, Result};
use nhook_target::MapIndex;
use object::{Object, ObjectSymbol, SymbolKind};
use std::path::Path;
use tracing::{debug, warn};

/// シンボルが見つかったテーブル
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTable {
    /// .dynsym
    Dynamic,
    /// .symtab
    Static,
}

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    /// モジュール内のアドレス（st_value）
    pub address: u64,
    pub size: u64,
    pub is_function: bool,
    pub table: SymbolTable,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64, is_function: bool, table: SymbolTable) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
            is_function,
            table,
        }
    }

    /// 表示用の名前を取得（デマングル可能ならデマングル後、できなければマングル名）
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }

    // C++のシンボルはマングル名のまま
    name.to_string()
}

/// 定義済みシンボルを出現順に列挙する
fn table_symbols(file: &object::File<'_>, table: SymbolTable) -> Vec<Symbol> {
    let iter = match table {
        SymbolTable::Dynamic => file.dynamic_symbols(),
        SymbolTable::Static => file.symbols(),
    };

    iter.filter(|symbol| !symbol.is_undefined())
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(Symbol::new(
                name.to_string(),
                symbol.address(),
                symbol.size(),
                symbol.kind() == SymbolKind::Text,
                table,
            ))
        })
        .collect()
}

impl ModuleImage {
    /// 名前に部分文字列を含む最初のシンボルを検索する
    ///
    /// まず .dynsym から関数シンボルのみを対象に探し、見つからなければ
    /// .symtab から種類を問わず探します。どちらもテーブル順で最初に一致したものを返し、
    /// 複数の候補の間で優劣は付けません。正確に指定したい場合は完全な名前を渡してください。
    pub fn find_symbol(&self, symbol_name: &str) -> Result<Option<Symbol>> {
        if symbol_name.is_empty() {
            return Ok(None);
        }

        let file = self.object()?;

        let dynamic = table_symbols(&file, SymbolTable::Dynamic)
            .into_iter()
            .find(|sym| sym.is_function && sym.name.contains(symbol_name));
        if dynamic.is_some() {
            return Ok(dynamic);
        }

        Ok(table_symbols(&file, SymbolTable::Static)
            .into_iter()
            .find(|sym| sym.name.contains(symbol_name)))
    }

    /// パターンにマッチするシンボルをすべて検索する
    ///
    /// マングル名とデマングル名の両方で検索します。
    pub fn find_symbols(&self, pattern: &str) -> Result<Vec<Symbol>> {
        let file = self.object()?;
        let matches = table_symbols(&file, SymbolTable::Dynamic)
            .into_iter()
            .chain(table_symbols(&file, SymbolTable::Static))
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .collect();
        Ok(matches)
    }
}

/// シンボル値を実行時アドレスに変換する
///
/// ET_DYN（共有オブジェクト・PIE）の st_value はロードベースからのオフセットなのでベースを加えます。
/// ET_EXEC の st_value は既に絶対アドレスなので、そのまま返します。
fn runtime_address(is_dynamic: bool, base: u64, st_value: u64) -> u64 {
    if is_dynamic {
        base.wrapping_add(st_value)
    } else {
        st_value
    }
}

/// モジュールのシンボル名から実行時アドレスを解決する
///
/// ベースアドレスはセッションのメモリマップ索引から、モジュールのファイル名で求めます。
pub struct ModuleSymbolResolver<'a> {
    maps: &'a MapIndex,
}

impl<'a> ModuleSymbolResolver<'a> {
    /// メモリマップ索引からシンボル解決器を作成する
    pub fn new(maps: &'a MapIndex) -> Self {
        Self { maps }
    }

    /// モジュールをロードしてシンボルの実行時アドレスを解決する
    ///
    /// モジュールが読み込めない、マップされていない、一致するシンボルが無い場合は None を返します。
    pub fn find_address<P: AsRef<Path>>(&self, module_path: P, symbol_name: &str) -> Option<u64> {
        let module_path = module_path.as_ref();
        let image = match ModuleImage::load(module_path) {
            Ok(image) => image,
            Err(e) => {
                warn!("Cannot load module {:?}: {}", module_path, e);
                return None;
            }
        };
        self.find_in_image(&image, symbol_name)
    }

    /// ロード済みのモジュールイメージからシンボルの実行時アドレスを解決する
    pub fn find_in_image(&self, image: &ModuleImage, symbol_name: &str) -> Option<u64> {
        let file_name = image.file_name()?;
        let base = match self.maps.base_of(file_name) {
            Some(base) => base,
            None => {
                warn!("Module {} is not mapped in the process", file_name);
                return None;
            }
        };

        let symbol = match image.find_symbol(symbol_name) {
            Ok(Some(symbol)) => symbol,
            Ok(None) => {
                debug!("No symbol containing '{}' in {}", symbol_name, file_name);
                return None;
            }
            Err(e) => {
                warn!("Failed to read symbols of {}: {}", file_name, e);
                return None;
            }
        };

        let address = runtime_address(image.is_dynamic(), base, symbol.address);
        debug!(
            "Resolved '{}' to {} ({:?}) at 0x{:x} (base 0x{:x})",
            symbol_name, symbol.name, symbol.table, address, base
        );
        Some(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_address_adds_base_for_shared_objects() {
        assert_eq!(runtime_address(true, 0x7f00_0000_0000, 0x1234), 0x7f00_0000_1234);
    }

    #[test]
    fn test_runtime_address_keeps_absolute_exec_address() {
        // 非PIE実行ファイルは 0x400000 付近にリンクされ、ベースもそこにマップされる
        assert_eq!(runtime_address(false, 0x400000, 0x401136), 0x401136);
    }

    #[test]
    fn test_demangle_rust_symbol() {
        let symbol = Symbol::new(
            "_ZN4core3fmt5write17h0123456789abcdefE".to_string(),
            0x1000,
            16,
            true,
            SymbolTable::Static,
        );
        assert_eq!(symbol.display_name(), "core::fmt::write");
    }

    #[test]
    fn test_demangle_keeps_c_symbol() {
        let symbol = Symbol::new("malloc".to_string(), 0, 0, true, SymbolTable::Dynamic);
        assert_eq!(symbol.display_name(), "malloc");
    }

    #[test]
    fn test_unmapped_module_is_not_found() {
        let maps = MapIndex::new();
        let resolver = ModuleSymbolResolver::new(&maps);
        assert_eq!(resolver.find_address("/nonexistent/libnothing.so", "main"), None);
    }
}
