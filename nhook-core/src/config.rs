//! トレース設定

use crate::engine::{EngineOptions, MemoryAccessKind};
use tracing::warn;

/// 実行スタックのデフォルトサイズ（8MB）
pub const DEFAULT_STACK_SIZE: usize = 0x800000;

/// レジスタが指すメモリを hexdump する際のバイト数
pub const DEFAULT_HEXDUMP_LEN: usize = 32;

/// 文字列判定で走査する最大バイト数
pub const DEFAULT_STRING_SCAN_LEN: usize = 256;

/// トレース設定
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// 実行スタックのサイズ
    pub stack_size: usize,
    pub hexdump_len: usize,
    pub string_scan_len: usize,
    /// 計装エンジンのオプション
    pub options: EngineOptions,
    /// 記録するメモリアクセスの種類
    pub memory_recording: MemoryAccessKind,
    /// トレース後にフックを再設定するか
    pub rearm: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            hexdump_len: DEFAULT_HEXDUMP_LEN,
            string_scan_len: DEFAULT_STRING_SCAN_LEN,
            options: EngineOptions::default(),
            memory_recording: MemoryAccessKind::ReadWrite,
            rearm: false,
        }
    }
}

impl TraceConfig {
    /// 環境変数で上書きした設定を作成する
    ///
    /// - `NHOOK_STACK_SIZE`: 実行スタックのサイズ（10進または0x付き16進）
    /// - `NHOOK_REARM`: "1" または "true" でトレース後にフックを再設定する
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("NHOOK_STACK_SIZE") {
            match parse_size(&value) {
                Some(size) => config.stack_size = size,
                None => warn!("Ignoring invalid NHOOK_STACK_SIZE '{}'", value),
            }
        }

        if let Ok(value) = std::env::var("NHOOK_REARM") {
            config.rearm = matches!(value.trim(), "1" | "true" | "yes");
        }

        config
    }
}

/// サイズ文字列をパースする（10進または0x付き16進）
pub fn parse_size(s: &str) -> Option<usize> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TraceConfig::default();
        assert_eq!(config.stack_size, 0x800000);
        assert_eq!(config.hexdump_len, 32);
        assert_eq!(config.string_scan_len, 256);
        assert_eq!(config.memory_recording, MemoryAccessKind::ReadWrite);
        assert!(config.options.bypass_pauth);
        assert!(!config.rearm);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x800000"), Some(0x800000));
        assert_eq!(parse_size("0X10"), Some(16));
        assert_eq!(parse_size(" 4096 "), Some(4096));
        assert_eq!(parse_size("0xzz"), None);
        assert_eq!(parse_size("big"), None);
    }
}
