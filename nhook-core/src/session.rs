//! トレースセッション
//!
//! フックが発火した1回の呼び出しについて、レジスタ状態の移植、実行スタックの確保、
//! 計装下での呼び出し、ログの書き出しまでを順に行います。
//!
//! 状態は Created → Bridging → StackReady → Running → Completed と遷移します。
//! 実行スタックを確保できなかった場合は Aborted になり、対象関数は呼び出されません。

use crate::config::TraceConfig;
use crate::engine::{InstrumentationEngine, StackRegion};
use crate::observer::TraceObserver;
use crate::sink::TraceSink;
use crate::TraceError;
use nhook_target::{Architecture, MapIndex, MemoryProbe};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Bridging,
    StackReady,
    Running,
    Completed,
    /// 実行スタックを確保できず中断した
    Aborted,
}

/// 1回のトレースの結果
#[derive(Debug, Clone)]
pub struct TraceReport {
    pub target: u64,
    /// トレースした命令数
    pub instructions: usize,
    /// ログのバイト数
    pub log_len: usize,
    /// 対象関数の戻り値（フォールトした場合は None）
    pub return_value: Option<u64>,
    /// エンジンが捕捉したフォールト
    pub fault: Option<String>,
    /// 計装下での呼び出しにかかった時間
    pub elapsed: Duration,
    /// ログの書き出し先（書き出しに失敗した場合は None）
    pub log_path: Option<PathBuf>,
}

/// エンジンのオプションとメモリアクセス記録を設定し、対象関数を含むモジュールを計装対象にする
///
/// 同じエンジンで複数回トレースする場合も1回だけ呼べば十分です。
pub fn prepare_engine<E: InstrumentationEngine>(
    engine: &mut E,
    target: u64,
    config: &TraceConfig,
) -> Result<(), TraceError> {
    engine.set_options(config.options);
    if !engine.record_memory_access(config.memory_recording) {
        warn!(
            "Engine does not support {:?} memory access recording",
            config.memory_recording
        );
    }

    if !engine.add_instrumented_module_from_addr(target) {
        return Err(TraceError::ModuleNotInstrumented(target));
    }
    Ok(())
}

/// 自プロセスのメモリマップ索引を読み込む（失敗時は空の索引）
pub(crate) fn load_maps() -> MapIndex {
    match MapIndex::load() {
        Ok(maps) => maps,
        Err(e) => {
            warn!("Failed to load memory map, locations will be bare addresses: {:#}", e);
            MapIndex::new()
        }
    }
}

/// 1回分のトレースセッション
pub struct Session<'e, E: InstrumentationEngine> {
    engine: &'e mut E,
    target: u64,
    config: TraceConfig,
    /// セッション所有のメモリマップ索引（実行時にオブザーバへ渡す）
    maps: MapIndex,
    state: SessionState,
}

impl<'e, E: InstrumentationEngine> Session<'e, E> {
    /// セッションを作成する
    ///
    /// エンジンを設定してから、現在のメモリマップ索引でセッションを作ります。
    pub fn new(engine: &'e mut E, target: u64, config: &TraceConfig) -> Result<Self, TraceError> {
        prepare_engine(engine, target, config)?;
        Ok(Self::with_maps(engine, target, config, load_maps()))
    }

    /// 既に読み込んだメモリマップ索引でセッションを作成する
    ///
    /// エンジンの設定（prepare_engine）は呼び出し側で済ませている前提です。
    pub fn with_maps(engine: &'e mut E, target: u64, config: &TraceConfig, maps: MapIndex) -> Self {
        debug!("Session for 0x{:x} created ({} mapped ranges)", target, maps.ranges().len());
        Self {
            engine,
            target,
            config: config.clone(),
            maps,
            state: SessionState::Created,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("Session 0x{:x}: {:?} -> {:?}", self.target, self.state, state);
        self.state = state;
    }

    /// 計装下で対象関数を1回呼び出し、ログをシンクに書き出す
    ///
    /// レジスタ状態はエンジンの既定値に戻してからキャプチャした値で上書きします。
    /// Created 以外の状態で呼ぶと InvalidSessionState を返し、何も実行しません。
    /// 実行スタックの確保に失敗した場合は対象関数もシンクも呼ばずに
    /// ResourceExhaustion を返します。エンジンが捕捉したフォールトはエラーにせず
    /// TraceReport::fault に記録し、それまでのログを書き出します。
    pub fn run(
        &mut self,
        captured: &<E::Arch as Architecture>::Captured,
        memory: &dyn MemoryProbe,
        sink: &mut dyn TraceSink,
    ) -> Result<TraceReport, TraceError> {
        // セッションは1回限り
        if self.state != SessionState::Created {
            return Err(TraceError::InvalidSessionState {
                target: self.target,
                state: self.state,
            });
        }

        self.set_state(SessionState::Bridging);
        let state = self.engine.gpr_state_mut();
        *state = Default::default();
        <E::Arch as Architecture>::bridge(captured, state);

        let stack = match self.engine.allocate_stack(self.config.stack_size) {
            Ok(stack) => stack,
            Err(e) => {
                warn!("Aborting trace of 0x{:x}: {}", self.target, e);
                self.set_state(SessionState::Aborted);
                return Err(e);
            }
        };
        self.set_state(SessionState::StackReady);
        <E::Arch as Architecture>::point_stack(self.engine.gpr_state_mut(), stack.top());

        self.set_state(SessionState::Running);
        let maps = std::mem::take(&mut self.maps);
        let mut observer = TraceObserver::new(maps, memory, &self.config);

        let started = Instant::now();
        let result = self.engine.call(self.target, &mut observer);
        let elapsed = started.elapsed();

        drop(stack);
        self.set_state(SessionState::Completed);

        let (return_value, fault) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => {
                warn!("Trace of 0x{:x} ended with a fault: {}", self.target, e);
                (None, Some(e.to_string()))
            }
        };

        let instructions = observer.instructions();
        let log = observer.into_log();
        let log_path = match sink.write(&log) {
            Ok(path) => path,
            Err(e) => {
                warn!("{}", e);
                None
            }
        };

        info!(
            "Traced 0x{:x}: {} instructions, cost = {:.6}s",
            self.target,
            instructions,
            elapsed.as_secs_f64()
        );

        Ok(TraceReport {
            target: self.target,
            instructions,
            log_len: log.len(),
            return_value,
            fault,
            elapsed,
            log_path,
        })
    }
}
