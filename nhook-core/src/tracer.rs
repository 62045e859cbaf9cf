//! 関数トレーサ
//!
//! 単発フックとトレースセッションをつなぎます。
//! フックが発火したら on_enter を呼ぶと、フックを外してから1回分のトレースを実行します。

use crate::config::TraceConfig;
use crate::engine::InstrumentationEngine;
use crate::hook::{HookState, Interceptor, SingleShotHook};
use crate::session::{load_maps, prepare_engine, Session, TraceReport};
use crate::sink::TraceSink;
use crate::{Result, TraceError};
use nhook_elf::ModuleSymbolResolver;
use nhook_target::{Architecture, MapIndex, Memory, MemoryProbe};
use std::path::Path;
use tracing::{debug, warn};

/// メモリを読めない環境で使うプローブ（内容表示はすべて省略される）
struct NoMemory;

impl MemoryProbe for NoMemory {
    fn is_valid_address(&self, _addr: u64) -> bool {
        false
    }

    fn read(&self, addr: u64, _size: usize) -> Result<Vec<u8>> {
        anyhow::bail!("Memory is not readable at 0x{:x}", addr)
    }
}

/// フックされた関数のトレーサ
pub struct FunctionTracer<E: InstrumentationEngine, I: Interceptor, S: TraceSink> {
    engine: E,
    hook: SingleShotHook<I>,
    sink: S,
    config: TraceConfig,
    memory: Box<dyn MemoryProbe>,
}

impl<E: InstrumentationEngine, I: Interceptor, S: TraceSink> FunctionTracer<E, I, S> {
    /// 対象アドレスにフックを設置する
    ///
    /// エンジンの設定と対象モジュールの計装登録はここで1回だけ行います。
    pub fn attach(
        mut engine: E,
        interceptor: I,
        target: u64,
        sink: S,
        config: TraceConfig,
    ) -> std::result::Result<Self, TraceError> {
        let memory: Box<dyn MemoryProbe> = match Memory::current() {
            Ok(memory) => Box::new(memory),
            Err(e) => {
                warn!("Memory contents will not be shown: {:#}", e);
                Box::new(NoMemory)
            }
        };

        prepare_engine(&mut engine, target, &config)?;
        let hook = SingleShotHook::arm(interceptor, target)?;
        debug!("Tracer attached to 0x{:x}", target);

        Ok(Self {
            engine,
            hook,
            sink,
            config,
            memory,
        })
    }

    /// モジュール内のシンボルを解決してフックを設置する
    pub fn attach_symbol<P: AsRef<Path>>(
        engine: E,
        interceptor: I,
        module_path: P,
        symbol: &str,
        sink: S,
        config: TraceConfig,
    ) -> std::result::Result<Self, TraceError> {
        let module_path = module_path.as_ref();
        let unresolved = || TraceError::UnresolvedSymbol {
            module: module_path.display().to_string(),
            symbol: symbol.to_string(),
        };

        let maps = MapIndex::load().map_err(|e| {
            warn!("Failed to load memory map: {:#}", e);
            unresolved()
        })?;
        let target = ModuleSymbolResolver::new(&maps)
            .find_address(module_path, symbol)
            .ok_or_else(unresolved)?;

        Self::attach(engine, interceptor, target, sink, config)
    }

    /// メモリの読み取り方法を差し替える
    pub fn with_memory(mut self, memory: Box<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    /// フックが発火したときに呼ぶ
    ///
    /// フックを外してセッションに入り、計装下で対象関数を1回実行します。
    /// 設定で rearm が有効な場合はトレース後にフックを再設置します。
    pub fn on_enter(
        &mut self,
        captured: &<E::Arch as Architecture>::Captured,
    ) -> std::result::Result<TraceReport, TraceError> {
        self.hook.disarm()?;
        self.hook.enter_session()?;

        let report = self.trace_once(captured);

        if self.config.rearm {
            if let Err(e) = self.hook.rearm() {
                warn!("{}", e);
            }
        }
        report
    }

    fn trace_once(
        &mut self,
        captured: &<E::Arch as Architecture>::Captured,
    ) -> std::result::Result<TraceReport, TraceError> {
        let target = self.hook.address();
        let mut session = Session::with_maps(&mut self.engine, target, &self.config, load_maps());
        session.run(captured, self.memory.as_ref(), &mut self.sink)
    }

    /// フックを手動で再設置する
    pub fn rearm(&mut self) -> std::result::Result<(), TraceError> {
        self.hook.rearm()
    }

    pub fn hook_state(&self) -> HookState {
        self.hook.state()
    }

    pub fn target(&self) -> u64 {
        self.hook.address()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn interceptor(&self) -> &I {
        self.hook.interceptor()
    }
}
