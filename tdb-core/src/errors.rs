//! デバッガのエラー型

use nix::errno::Errno;
use nix::unistd::Pid;

/// コマンド単位で回復可能なエラー
///
/// いずれのエラーもセッションを終了させません。
#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    /// トレースインターフェースの呼び出しが失敗した
    #[error("{op} failed{}: {source}", fmt_address(.address))]
    SyscallFailure {
        op: &'static str,
        address: Option<u64>,
        #[source]
        source: Errno,
    },

    /// 同じアドレスに有効なブレークポイントが既に存在する
    #[error("breakpoint already exists at 0x{0:x}")]
    AddressConflict(u64),

    /// ブレークポイントテーブルが満杯
    #[error("breakpoint capacity of {0} exceeded")]
    CapacityExceeded(usize),

    /// 名前に対応するレジスタが存在しない
    #[error("unknown x86_64 register: {0}")]
    UnknownRegister(String),

    /// コマンド引数が不正
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// ブレークポイントの所有プロセスと操作対象が一致しない
    #[error("breakpoint belongs to process {expected}, not {actual}")]
    ProcessMismatch { expected: Pid, actual: Pid },
}

fn fmt_address(address: &Option<u64>) -> String {
    match address {
        Some(addr) => format!(" at 0x{:x}", addr),
        None => String::new(),
    }
}

impl DebugError {
    pub(crate) fn syscall(op: &'static str, address: Option<u64>, source: Errno) -> Self {
        tracing::warn!(op, address = ?address, error = %source, "tracing syscall failed");
        DebugError::SyscallFailure {
            op,
            address,
            source,
        }
    }
}

/// デバッガの結果型
pub type Result<T> = std::result::Result<T, DebugError>;
