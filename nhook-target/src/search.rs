//! ワイルドカード付きバイト列検索
//!
//! シグネチャパターン（例: "f4 4f ?? a9"）をメモリ領域やファイル内容から探します。
//! Boyer-Moore-Horspool のスキップテーブルを使います。

use crate::Result;
use std::str::FromStr;

/// 検索パターン（None はワイルドカード）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(Vec<Option<u8>>);

impl Pattern {
    /// バイト列からパターンを作成する（ワイルドカード無し）
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.iter().copied().map(Some).collect())
    }

    /// 16進文字列をパースする
    ///
    /// 2文字で1バイト。どちらかの文字が '?' ならそのバイトはワイルドカードになります。
    /// 空白は無視します。
    pub fn parse(hex: &str) -> Result<Self> {
        let digits: Vec<char> = hex.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() % 2 != 0 {
            return Err(anyhow::anyhow!("Pattern '{}' has an odd number of hex digits", hex));
        }

        let bytes = digits
            .chunks(2)
            .map(|pair| {
                if pair[0] == '?' || pair[1] == '?' {
                    return Ok(None);
                }
                let text: String = pair.iter().collect();
                u8::from_str_radix(&text, 16)
                    .map(Some)
                    .map_err(|e| anyhow::anyhow!("Invalid hex byte '{}' in pattern: {}", text, e))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self(bytes))
    }

    /// パターンのバイト数
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 空のパターンか
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn matches(&self, window: &[u8]) -> bool {
        self.0
            .iter()
            .zip(window)
            .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
    }

    /// スキップテーブルを構築する
    ///
    /// 末尾以外にワイルドカードがある場合、シフト量はその位置から末尾までの距離を超えない。
    fn skip_table(&self) -> [usize; 256] {
        let len = self.0.len();
        let last = len - 1;
        let max_shift = self.0[..last]
            .iter()
            .rposition(Option::is_none)
            .map_or(len, |i| last - i);

        let mut table = [max_shift; 256];
        for (i, byte) in self.0[..last].iter().enumerate() {
            if let Some(b) = byte {
                table[*b as usize] = (last - i).min(max_shift);
            }
        }
        table
    }
}

impl FromStr for Pattern {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// パターンが最初に現れるオフセットを返す
///
/// パターンが空、またはヘイスタックより長い場合は None を返します。
pub fn search_bytes(haystack: &[u8], pattern: &Pattern) -> Option<usize> {
    let len = pattern.len();
    if len == 0 || len > haystack.len() {
        return None;
    }

    let last = len - 1;
    let table = pattern.skip_table();
    let mut pos = 0;

    while pos + len <= haystack.len() {
        if pattern.matches(&haystack[pos..pos + len]) {
            return Some(pos);
        }
        pos += table[haystack[pos + last] as usize];
    }

    None
}

/// 16進文字列パターンで検索する
pub fn search_hex(haystack: &[u8], hex: &str) -> Result<Option<usize>> {
    let pattern = Pattern::parse(hex)?;
    Ok(search_bytes(haystack, &pattern))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pattern() {
        let pattern = Pattern::parse("f4 4f ?? a9").unwrap();
        assert_eq!(pattern, Pattern(vec![Some(0xf4), Some(0x4f), None, Some(0xa9)]));
        assert_eq!(Pattern::parse("a?").unwrap(), Pattern(vec![None]));
        assert!(Pattern::parse("abc").is_err());
        assert!(Pattern::parse("zz").is_err());
    }

    #[test]
    fn test_wildcard_first_byte() {
        let haystack = [0x01, 0x03, 0x05, 0x02, 0x02];
        assert_eq!(search_hex(&haystack, "??02").unwrap(), Some(2));
        assert_eq!(search_hex(&[0x02, 0x02], "??02").unwrap(), Some(0));
        assert_eq!(search_hex(&[0x02, 0x01], "??02").unwrap(), None);
    }

    #[test]
    fn test_exact_match() {
        let haystack = b"xxtuzi\0yy";
        let pattern = Pattern::from_bytes(b"tuzi");
        assert_eq!(search_bytes(haystack, &pattern), Some(2));
        assert_eq!(search_bytes(haystack, &Pattern::from_bytes(b"tuzx")), None);
    }

    #[test]
    fn test_wildcard_in_middle_does_not_overshoot() {
        // ワイルドカードの後ろに同じバイトが無くてもシフトしすぎない
        let haystack = [0x00, 0x11, 0x99, 0x33, 0x00];
        assert_eq!(search_hex(&haystack, "11 ?? 33").unwrap(), Some(1));
    }

    #[test]
    fn test_cc_is_not_a_wildcard() {
        let haystack = [0x90, 0x90, 0xcc, 0x01];
        assert_eq!(search_hex(&haystack, "cc01").unwrap(), Some(2));
        assert_eq!(search_hex(&haystack, "cc90").unwrap(), None);
    }

    #[test]
    fn test_out_of_bounds_inputs() {
        assert_eq!(search_hex(&[], "??02").unwrap(), None);
        assert_eq!(search_hex(&[0x02], "??02").unwrap(), None);
        assert_eq!(search_hex(&[0x01, 0x02], "").unwrap(), None);
    }

    #[test]
    fn test_match_at_end() {
        let haystack = [0u8, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(search_hex(&haystack, "0607").unwrap(), Some(6));
        assert_eq!(search_hex(&haystack, "00010203040506 07").unwrap(), Some(0));
    }
}
