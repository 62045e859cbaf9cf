//! モジュールシンボル解決のテスト
//!
//! テストバイナリ自身をモジュールとして読み込み、実行時アドレスを解決する。

use nhook_elf::{ModuleImage, ModuleSymbolResolver, SymbolTable};
use nhook_target::MapIndex;

#[no_mangle]
pub extern "C" fn nhook_elf_marker_function(value: u64) -> u64 {
    value.wrapping_mul(3)
}

fn marker_address() -> u64 {
    nhook_elf_marker_function as usize as u64
}

#[test]
fn test_find_address_in_own_executable() {
    let exe = std::env::current_exe().expect("Failed to get current exe");
    let maps = MapIndex::load().expect("Failed to load /proc/self/maps");
    let resolver = ModuleSymbolResolver::new(&maps);

    let address = resolver
        .find_address(&exe, "nhook_elf_marker_function")
        .expect("marker function should resolve");

    assert_eq!(address, marker_address());
    assert_eq!(nhook_elf_marker_function(2), 6);
}

#[test]
fn test_find_address_with_partial_name() {
    let exe = std::env::current_exe().expect("Failed to get current exe");
    let maps = MapIndex::load().expect("Failed to load /proc/self/maps");
    let resolver = ModuleSymbolResolver::new(&maps);

    // 部分一致でも解決できる
    let address = resolver.find_address(&exe, "elf_marker_func");
    assert_eq!(address, Some(marker_address()));
}

#[test]
fn test_missing_symbol_is_not_found() {
    let exe = std::env::current_exe().expect("Failed to get current exe");
    let maps = MapIndex::load().expect("Failed to load /proc/self/maps");
    let resolver = ModuleSymbolResolver::new(&maps);

    assert_eq!(resolver.find_address(&exe, "no_such_symbol_in_this_binary_zzz"), None);
    assert_eq!(resolver.find_address(&exe, ""), None);
}

#[test]
fn test_find_symbols_lists_marker() {
    let exe = std::env::current_exe().expect("Failed to get current exe");
    let image = ModuleImage::load(&exe).expect("Failed to load test executable");

    let symbols = image.find_symbols("nhook_elf_marker").unwrap();
    assert!(!symbols.is_empty(), "Should find marker symbol");

    let marker = symbols
        .iter()
        .find(|s| s.name == "nhook_elf_marker_function")
        .expect("exact marker symbol");
    assert!(marker.is_function);
    assert!(matches!(marker.table, SymbolTable::Dynamic | SymbolTable::Static));
    assert!(image.is_dynamic());
}

#[test]
fn test_load_rejects_non_elf() {
    let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
    assert!(ModuleImage::load(manifest).is_err());
    assert!(ModuleImage::load("/nonexistent/libnothing.so").is_err());
}
