//! トレースインターフェース
//!
//! デバッガのエンジンは ptrace を直接呼ばず、このトレイトを経由して
//! 対象プロセスを操作します。

use crate::StopReason;
use nix::errno::Errno;
use nix::unistd::Pid;

/// 停止中のプロセスから一括で転送されるレジスタセット
pub type RegisterSnapshot = nix::libc::user_regs_struct;

/// 再開と待機の組のうち、どちらが失敗したか
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResumeError {
    /// 再開要求が拒否された。対象は動いていない
    #[error("resume failed: {0}")]
    Resume(Errno),
    /// 再開後の待機に失敗した。対象が動いたかは分からない
    #[error("wait failed: {0}")]
    Wait(Errno),
}

impl ResumeError {
    pub fn errno(self) -> Errno {
        match self {
            ResumeError::Resume(errno) | ResumeError::Wait(errno) => errno,
        }
    }
}

/// 停止中のトレース対象プロセスに対するプリミティブ操作
///
/// 再開と待機は常に一組で行います。前回の待機が完了する前に
/// 2回目の再開を発行することはできません。
pub trait Tracer {
    /// 対象のプロセスID
    fn pid(&self) -> Pid;

    /// 指定アドレスから1ワード（8バイト）を読み取る（PTRACE_PEEKDATA）
    fn peek_word(&self, address: u64) -> nix::Result<u64>;

    /// 指定アドレスに1ワード（8バイト）を書き込む（PTRACE_POKEDATA）
    fn poke_word(&self, address: u64, value: u64) -> nix::Result<()>;

    /// レジスタセット全体を取得する（PTRACE_GETREGS）
    fn get_regs(&self) -> nix::Result<RegisterSnapshot>;

    /// レジスタセット全体を書き戻す（PTRACE_SETREGS）
    fn set_regs(&self, regs: RegisterSnapshot) -> nix::Result<()>;

    /// 1命令だけ実行し、次の停止まで待機する
    fn step_and_wait(&self) -> Result<StopReason, ResumeError>;

    /// 実行を継続し、次の停止まで待機する
    fn cont_and_wait(&self) -> Result<StopReason, ResumeError>;
}
