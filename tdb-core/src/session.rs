//! トレースセッション
//!
//! 1つのトレース対象プロセスに対するデバッガの状態を保持します。

use crate::breakpoint::{BreakpointSet, DEFAULT_MAX_BREAKPOINTS};
use crate::errors::{DebugError, Result};
use nix::unistd::Pid;
use tdb_target::Tracer;

/// セッションの設定
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 同時に保持できるブレークポイントの上限
    pub max_breakpoints: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_breakpoints: DEFAULT_MAX_BREAKPOINTS,
        }
    }
}

/// トレースセッション
pub struct TraceSession<T: Tracer> {
    /// トレース対象（プロセスIDはここから取る）
    tracer: T,
    /// 実行可能ファイルのパス（表示用）
    target_path: String,
    /// 相対アドレスの基準（未解決なら0）
    base_address: u64,
    /// ブレークポイント
    breakpoints: BreakpointSet,
}

impl<T: Tracer> TraceSession<T> {
    /// 停止済みのトレース対象からセッションを作成する
    pub fn new(
        tracer: T,
        target_path: impl Into<String>,
        base_address: u64,
        config: SessionConfig,
    ) -> Result<Self> {
        let target_path = target_path.into();
        if target_path.len() >= nix::libc::PATH_MAX as usize {
            return Err(DebugError::InvalidArgument(format!(
                "target path is longer than {} bytes",
                nix::libc::PATH_MAX
            )));
        }

        if base_address == 0 {
            tracing::warn!("base address unresolved, relative addresses will be used as absolute");
        }
        tracing::debug!(
            pid = tracer.pid().as_raw(),
            target = %target_path,
            base = format_args!("0x{:x}", base_address),
            max_breakpoints = config.max_breakpoints,
            "trace session created"
        );

        Ok(Self {
            tracer,
            target_path,
            base_address,
            breakpoints: BreakpointSet::new(config.max_breakpoints),
        })
    }

    /// プロセスIDを取得する
    pub fn process_id(&self) -> Pid {
        self.tracer.pid()
    }

    pub fn target_path(&self) -> &str {
        &self.target_path
    }

    pub fn base_address(&self) -> u64 {
        self.base_address
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    /// トレース対象とブレークポイント集合を同時に借用する
    pub(crate) fn parts_mut(&mut self) -> (&T, &mut BreakpointSet) {
        (&self.tracer, &mut self.breakpoints)
    }

    /// 相対アドレスを絶対アドレスに変換する
    pub fn resolve_address(&self, offset: u64) -> Result<u64> {
        self.base_address.checked_add(offset).ok_or_else(|| {
            DebugError::InvalidArgument(format!(
                "address 0x{:x} + 0x{:x} overflows",
                self.base_address, offset
            ))
        })
    }

    /// セッションを終了する
    ///
    /// 全てのブレークポイントを解除してからトレース対象を返します。
    /// 解除の失敗はログに残し、終了処理は続行します。
    pub fn end(mut self) -> T {
        let failures = self.breakpoints.disable_all(&self.tracer);
        if !failures.is_empty() {
            tracing::warn!(count = failures.len(), "some breakpoints could not be restored");
        }
        self.target_path.clear();
        self.tracer
    }
}
