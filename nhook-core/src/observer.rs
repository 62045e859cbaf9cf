//! 命令オブザーバ
//!
//! 計装エンジンから命令ごとに呼ばれる3つのコールバック（命令前・命令後・メモリアクセス）を
//! 1つのトレイトにまとめ、トレースログを組み立てる実装を提供します。
//!
//! 1命令分のログは次の形式になります。
//! ```text
//! libtarget.so[0x1010]:0x5a0000001010: ldr x0, [x1]\tr[x1=0x7fd0001000 ]\tw[x0=0x5a00002000 ]
//! Strings :tuzi
//!    mem[r]:0x7fd0001000 size:8 value:0x5a00002000
//!
//! ```

use crate::config::TraceConfig;
use crate::engine::{InstAnalysis, MemoryAccess, OperandKind, RegisterAccess, VmAction};
use crate::hexdump::render_hexdump;
use nhook_target::memory::page_size;
use nhook_target::{is_printable_text, GprContext, MapIndex, MemoryProbe};
use std::fmt::Write as _;

/// 計装エンジンに登録する命令オブザーバ
pub trait InstructionObserver<S> {
    /// 命令の実行前に呼ばれる
    fn before(&mut self, inst: &InstAnalysis, gpr: &S) -> VmAction;

    /// 命令の実行後に呼ばれる
    fn after(&mut self, inst: &InstAnalysis, gpr: &S) -> VmAction;

    /// 命令の実行後、その命令のメモリアクセス一覧とともに呼ばれる（アクセスが無くても呼ばれる）
    fn memory_access(&mut self, inst: &InstAnalysis, accesses: &[MemoryAccess], gpr: &S) -> VmAction;
}

/// トレースログを組み立てるオブザーバ
pub struct TraceObserver<'m> {
    /// セッション所有のメモリマップ索引とシンボルキャッシュ
    maps: MapIndex,
    memory: &'m dyn MemoryProbe,
    log: String,
    hexdump_len: usize,
    string_scan_len: usize,
    instructions: usize,
}

impl<'m> TraceObserver<'m> {
    /// オブザーバを作成する
    pub fn new(maps: MapIndex, memory: &'m dyn MemoryProbe, config: &TraceConfig) -> Self {
        Self {
            maps,
            memory,
            log: String::new(),
            hexdump_len: config.hexdump_len,
            string_scan_len: config.string_scan_len,
            instructions: 0,
        }
    }

    /// ここまでのログを取得する
    pub fn log(&self) -> &str {
        &self.log
    }

    /// ログを取り出す
    pub fn into_log(self) -> String {
        self.log
    }

    /// トレースした命令数
    pub fn instructions(&self) -> usize {
        self.instructions
    }

    /// メモリマップ索引を取得する
    pub fn maps(&self) -> &MapIndex {
        &self.maps
    }

    /// 命令の位置を出力する
    ///
    /// エンジンのシンボル解析、メモリマップ索引、アドレスのみ、の順に試す。
    fn write_location(&mut self, inst: &InstAnalysis) {
        if let Some(symbol) = &inst.symbol {
            let _ = write!(
                self.log,
                "{}[0x{:x}]:0x{:x}: {}",
                symbol, inst.symbol_offset, inst.address, inst.disassembly
            );
            return;
        }

        let location = self.maps.resolve(inst.address);
        if location.is_empty() {
            let _ = write!(self.log, "0x{:x}: {}", inst.address, inst.disassembly);
        } else {
            let _ = write!(self.log, "{}:0x{:x}: {}", location, inst.address, inst.disassembly);
        }
    }

    /// アドレスらしきレジスタ値の指す先を文字列または hexdump で出力する
    fn describe_pointer(&self, reg_name: &str, value: u64, out: &mut String) {
        if !self.memory.is_valid_address(value) {
            return;
        }

        let text = self.memory.read_until_nul(value, self.string_scan_len);
        if is_printable_text(&text) {
            let _ = writeln!(out, "Strings :{}", String::from_utf8_lossy(&text[..text.len() - 1]));
            return;
        }

        let data = match self.memory.read(value, self.hexdump_len) {
            Ok(data) => data,
            Err(_) => {
                // ページ末尾をまたぐ場合は同じページ内だけを表示する
                let page = page_size().unwrap_or(4096) as u64;
                let within_page = ((page - value % page) as usize).min(self.hexdump_len);
                match self.memory.read(value, within_page) {
                    Ok(data) => data,
                    Err(_) => return,
                }
            }
        };

        let _ = writeln!(out, "Hexdump for {} at address 0x{:x}:", reg_name, value);
        render_hexdump(out, &data, value);
    }
}

/// 条件に合うアクセス方向の汎用レジスタオペランドを (名前, 値) で列挙する
fn register_values<'i, S: GprContext>(
    inst: &'i InstAnalysis,
    gpr: &S,
    direction: fn(RegisterAccess) -> bool,
) -> Vec<(&'i str, u64)> {
    inst.operands
        .iter()
        .filter(|op| op.kind == OperandKind::Gpr && direction(op.access))
        .filter_map(|op| {
            let value = gpr.get(op.reg_ctx_idx?)?;
            Some((op.reg_name.as_deref().unwrap_or("?"), value))
        })
        .collect()
}

fn join_registers(values: &[(&str, u64)]) -> String {
    let mut out = String::new();
    for (name, value) in values {
        let _ = write!(out, "{}=0x{:x} ", name, value);
    }
    out
}

impl<'m, S: GprContext> InstructionObserver<S> for TraceObserver<'m> {
    fn before(&mut self, inst: &InstAnalysis, gpr: &S) -> VmAction {
        self.instructions += 1;
        self.write_location(inst);

        let read = register_values(inst, gpr, RegisterAccess::is_read);
        if !read.is_empty() {
            let _ = write!(self.log, "\tr[{}]", join_registers(&read));
        }
        VmAction::Continue
    }

    fn after(&mut self, inst: &InstAnalysis, gpr: &S) -> VmAction {
        let written = register_values(inst, gpr, RegisterAccess::is_write);

        let mut contents = String::new();
        for (name, value) in &written {
            self.describe_pointer(name, *value, &mut contents);
        }

        if !written.is_empty() {
            let _ = write!(self.log, "\tw[{}]", join_registers(&written));
        }
        self.log.push('\n');
        self.log.push_str(&contents);
        VmAction::Continue
    }

    fn memory_access(&mut self, _inst: &InstAnalysis, accesses: &[MemoryAccess], _gpr: &S) -> VmAction {
        for access in accesses {
            let _ = writeln!(
                self.log,
                "   mem[{}]:0x{:x} size:{} value:0x{:x}",
                access.kind.tag(),
                access.address,
                access.size,
                access.value
            );
        }
        self.log.push('\n');
        VmAction::Continue
    }
}
