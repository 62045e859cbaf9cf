//! nhook 関数トレーサのコア機能
//!
//! このクレートは、フックされた関数を計装エンジン上で1回だけ再実行し、
//! 命令ごとの逆アセンブル・レジスタの読み書き・メモリアクセスを
//! シンボル付きのテキストログとして出力する機能を提供します。
//! 計装エンジンとフックエンジンは外部から供給され、トレイト境界でのみ扱います。

pub mod config;
pub mod engine;
pub mod errors;
pub mod hexdump;
pub mod hook;
pub mod observer;
pub mod session;
pub mod sink;
pub mod tracer;

pub use config::TraceConfig;
pub use engine::{
    EngineOptions, InstAnalysis, InstrumentationEngine, MemoryAccess, MemoryAccessKind, Operand,
    OperandKind, RegisterAccess, StackRegion, VmAction,
};
pub use errors::TraceError;
pub use hexdump::render_hexdump;
pub use hook::{HookState, Interceptor, SingleShotHook};
pub use observer::{InstructionObserver, TraceObserver};
pub use session::{prepare_engine, Session, SessionState, TraceReport};
pub use sink::{FileSink, TraceSink};
pub use tracer::FunctionTracer;

// 他のクレートから使用するために再エクスポート
pub use nhook_target::{Aarch64, Architecture, GprContext, MapIndex, MemoryProbe, NativeArch, X86_64};

/// コア機能の結果型
pub type Result<T> = anyhow::Result<T>;
