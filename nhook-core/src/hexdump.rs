//! hexdump 形式の出力

use std::fmt::Write as _;

/// 1行あたりのバイト数
const BYTES_PER_ROW: usize = 16;

/// メモリ内容を hexdump 形式でバッファに追記する
///
/// 1行16バイトで、アドレス（8桁以上の16進）、バイト値、`|ASCII|` 列を出力します。
/// 8バイト目の後には空白を1つ追加し、最終行が16バイトに満たない場合も列幅は揃えます。
/// 印字不可能なバイトは ASCII 列で `.` になります。
///
/// 出力例:
/// ```text
/// 00001000: 74 75 7a 69 00 00 00 00  00 00 00 00 00 00 00 00  |tuzi............|
/// ```
pub fn render_hexdump(out: &mut String, data: &[u8], base_address: u64) {
    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        let address = base_address + (row * BYTES_PER_ROW) as u64;
        let _ = write!(out, "{:08x}: ", address);

        let mut ascii = String::with_capacity(BYTES_PER_ROW);
        for i in 0..BYTES_PER_ROW {
            match chunk.get(i) {
                Some(&byte) => {
                    let _ = write!(out, "{:02x} ", byte);
                    ascii.push(if (0x20..=0x7e).contains(&byte) { byte as char } else { '.' });
                }
                None => {
                    // 足りないバイトは空白で埋める
                    out.push_str("   ");
                    ascii.push(' ');
                }
            }
            if i == 7 {
                out.push(' ');
            }
        }

        let _ = writeln!(out, " |{}|", ascii);
    }
}
