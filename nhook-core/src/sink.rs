//! トレースログの出力先

use crate::TraceError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// トレースログの出力先
pub trait TraceSink {
    /// 1回分のトレースログを書き出し、書き出したパスを返す
    fn write(&mut self, log: &str) -> Result<Option<PathBuf>, TraceError>;
}

/// データディレクトリ内の trace_log.txt に書き出すシンク
///
/// 書き出しのたびにファイルを切り詰めて上書きします。
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    /// ログファイル名
    pub const FILE_NAME: &'static str = "trace_log.txt";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// NHOOK_DATA_DIR からシンクを作成する
    pub fn from_env() -> Result<Self, TraceError> {
        match std::env::var_os("NHOOK_DATA_DIR") {
            Some(dir) if !dir.is_empty() => Ok(Self::new(dir)),
            _ => Err(TraceError::DataDirUnavailable),
        }
    }

    /// 書き出し先のパス
    pub fn path(&self) -> PathBuf {
        self.dir.join(Self::FILE_NAME)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl TraceSink for FileSink {
    fn write(&mut self, log: &str) -> Result<Option<PathBuf>, TraceError> {
        let path = self.path();
        std::fs::write(&path, log).map_err(|source| TraceError::Sink {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {} bytes of trace log to {:?}", log.len(), path);
        Ok(Some(path))
    }
}
