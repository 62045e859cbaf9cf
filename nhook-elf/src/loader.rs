//! ELFファイルの読み込み機能

use crate::Result;
use object::{Object, ObjectKind};
use std::fs;
use std::path::{Path, PathBuf};

/// ディスク上のモジュールイメージ
pub struct ModuleImage {
    /// ファイルパス
    path: PathBuf,
    /// ファイル内容
    data: Vec<u8>,
}

impl ModuleImage {
    /// ELFファイルを読み込む
    ///
    /// ファイルを読み込んだ時点で一度パースし、ELFとして解釈できることを確認します。
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        object::File::parse(&*data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// オブジェクトファイルとしてパースする
    pub fn object(&self) -> Result<object::File<'_>> {
        object::File::parse(&*self.data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", self.path, e))
    }

    /// ファイルパスを取得する
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// ファイル名部分を取得する（maps の領域名と照合するため）
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// 共有オブジェクトまたはPIEかどうかを判定する
    ///
    /// ET_DYN の場合、シンボルアドレスはロードベースからのオフセットです。
    pub fn is_dynamic(&self) -> bool {
        self.object()
            .map(|file| matches!(file.kind(), ObjectKind::Dynamic))
            .unwrap_or(false)
    }
}
