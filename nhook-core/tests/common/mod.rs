//! 統合テスト用の計装エンジンとフックエンジン
//!
//! ScriptedEngine は実際の命令を実行せず、あらかじめ用意した命令列を
//! 実エンジンと同じ順序（before → 書き込み → after → memory_access）でオブザーバに渡します。

#![allow(dead_code)]

use nhook_core::engine::allocate_execution_stack;
use nhook_core::{
    EngineOptions, InstAnalysis, InstructionObserver, InstrumentationEngine, Interceptor,
    MemoryAccess, MemoryAccessKind, Operand, RegisterAccess, StackRegion, TraceError, VmAction,
};
use nhook_target::registers::{Aarch64Context, Aarch64State};
use nhook_target::{Aarch64, ExecutionStack, GprContext};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// 生存数を数える実行スタック
pub struct CountedStack {
    stack: ExecutionStack,
    live: Rc<Cell<usize>>,
}

impl StackRegion for CountedStack {
    fn top(&self) -> u64 {
        self.stack.top()
    }
}

impl Drop for CountedStack {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

/// スクリプトの1命令
pub struct Step {
    pub inst: InstAnalysis,
    /// 命令実行で書き込まれる (スロット, 値)
    pub writes: Vec<(usize, u64)>,
    pub accesses: Vec<MemoryAccess>,
}

impl Step {
    pub fn new(address: u64, disassembly: &str, operands: Vec<Operand>) -> Self {
        Self {
            inst: InstAnalysis {
                address,
                symbol: None,
                symbol_offset: 0,
                disassembly: disassembly.to_string(),
                operands,
            },
            writes: Vec::new(),
            accesses: Vec::new(),
        }
    }

    pub fn write(mut self, slot: usize, value: u64) -> Self {
        self.writes.push((slot, value));
        self
    }

    pub fn access(mut self, kind: MemoryAccessKind, address: u64, size: usize, value: u64) -> Self {
        self.accesses.push(MemoryAccess {
            kind,
            address,
            size,
            value,
        });
        self
    }
}

pub struct ScriptedEngine {
    pub state: Aarch64State,
    pub script: Vec<Step>,
    pub options: Option<EngineOptions>,
    pub recording: Option<MemoryAccessKind>,
    pub instrumented: Vec<u64>,
    /// call が呼ばれた回数
    pub calls: usize,
    /// call 時点のレジスタ状態
    pub state_at_call: Option<Aarch64State>,
    pub live_stacks: Rc<Cell<usize>>,
    /// 最後に確保したスタックの先頭
    pub stack_top: Option<u64>,
    pub fail_stack: bool,
    pub refuse_module: bool,
    /// この命令数を実行した後にフォールトする
    pub fault_after: Option<usize>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            state: Aarch64State::default(),
            script,
            options: None,
            recording: None,
            instrumented: Vec::new(),
            calls: 0,
            state_at_call: None,
            live_stacks: Rc::new(Cell::new(0)),
            stack_top: None,
            fail_stack: false,
            refuse_module: false,
            fault_after: None,
        }
    }
}

impl InstrumentationEngine for ScriptedEngine {
    type Arch = Aarch64;
    type Stack = CountedStack;

    fn gpr_state(&self) -> &Aarch64State {
        &self.state
    }

    fn gpr_state_mut(&mut self) -> &mut Aarch64State {
        &mut self.state
    }

    fn set_options(&mut self, options: EngineOptions) {
        self.options = Some(options);
    }

    fn record_memory_access(&mut self, kind: MemoryAccessKind) -> bool {
        self.recording = Some(kind);
        true
    }

    fn add_instrumented_module_from_addr(&mut self, address: u64) -> bool {
        if self.refuse_module {
            return false;
        }
        self.instrumented.push(address);
        true
    }

    fn allocate_stack(&mut self, size: usize) -> Result<CountedStack, TraceError> {
        if self.fail_stack {
            return Err(TraceError::ResourceExhaustion {
                size,
                reason: "simulated mmap failure".to_string(),
            });
        }
        let stack = allocate_execution_stack(size)?;
        self.stack_top = Some(stack.top());
        self.live_stacks.set(self.live_stacks.get() + 1);
        Ok(CountedStack {
            stack,
            live: self.live_stacks.clone(),
        })
    }

    fn call(
        &mut self,
        target: u64,
        observer: &mut dyn InstructionObserver<Aarch64State>,
    ) -> Result<u64, TraceError> {
        self.calls += 1;
        self.state_at_call = Some(self.state);
        self.state.pc = target;

        for (executed, step) in self.script.iter().enumerate() {
            if self.fault_after == Some(executed) {
                return Err(TraceError::EngineFault {
                    address: step.inst.address,
                    reason: "SIGSEGV".to_string(),
                });
            }

            if observer.before(&step.inst, &self.state) == VmAction::Stop {
                break;
            }
            for &(slot, value) in &step.writes {
                self.state.set(slot, value);
            }
            observer.after(&step.inst, &self.state);
            observer.memory_access(&step.inst, &step.accesses, &self.state);
        }

        Ok(self.state.x[0])
    }
}

/// 定数を返すだけの関数（mov w0, #0x2a; ret）
pub fn constant_function() -> Vec<Step> {
    vec![
        Step::new(
            0x5a00_0000_1000,
            "mov w0, #0x2a",
            vec![Operand::gpr("w0", 0, RegisterAccess::Write), Operand::immediate()],
        )
        .write(0, 0x2a),
        Step::new(
            0x5a00_0000_1004,
            "ret",
            vec![Operand::gpr("x30", 30, RegisterAccess::Read)],
        ),
    ]
}

/// フック地点でキャプチャされたコンテキスト
pub fn captured_context() -> Aarch64Context {
    let mut ctx = Aarch64Context::default();
    for (i, x) in ctx.x.iter_mut().enumerate() {
        *x = 0x100 + i as u64;
    }
    ctx.fp = 0x7fff_0000_0100;
    ctx.lr = 0x5a00_0000_2000;
    ctx.sp = 0x7fff_0000_0000;
    ctx
}

pub const MAPS: &str = "\
5a0000000000-5a0000004000 r-xp 00000000 fd:01 1234 /data/app/lib/arm64/libdemo.so
7fff00000000-7fff00021000 rw-p 00000000 00:00 0 [stack]
";

/// 設置・除去の呼び出しを記録するフックエンジン
#[derive(Clone, Default)]
pub struct RecordingInterceptor {
    pub calls: Rc<RefCell<Vec<String>>>,
}

impl Interceptor for RecordingInterceptor {
    fn install(&mut self, address: u64) -> nhook_core::Result<()> {
        self.calls.borrow_mut().push(format!("install 0x{:x}", address));
        Ok(())
    }

    fn remove(&mut self, address: u64) {
        self.calls.borrow_mut().push(format!("remove 0x{:x}", address));
    }
}
