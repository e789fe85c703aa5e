//! プロセス制御機能

use crate::{Memory, RegisterSnapshot, Registers, ResumeError, Result, Tracer};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::ffi::CString;
use std::path::Path;

/// 停止イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 実行継続後のSIGTRAP（ブレークポイントヒット）
    Breakpoint,
    /// ステップ実行完了（SIGTRAP）
    Step,
    /// シグナル受信による停止
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// シグナルによるプロセス終了
    Killed(Signal),
    /// その他の停止
    Other,
}

impl StopReason {
    /// 待機結果を停止イベントに変換する
    ///
    /// SIGTRAPがステップ実行によるものかは呼び出し元しか知らないため、
    /// `stepping` で区別します。
    pub fn from_wait_status(status: WaitStatus, stepping: bool) -> Self {
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) if stepping => StopReason::Step,
            WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Breakpoint,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Killed(signal),
            _ => StopReason::Other,
        }
    }

    /// プロセスが終了したか
    pub fn is_terminated(&self) -> bool {
        matches!(self, StopReason::Exited(_) | StopReason::Killed(_))
    }
}

/// デバッグ対象のプロセス
pub struct Process {
    pid: Pid,
    memory: Memory,
    registers: Registers,
}

impl Process {
    fn from_pid(pid: Pid) -> Self {
        Self {
            pid,
            memory: Memory::new(pid),
            registers: Registers::new(pid),
        }
    }

    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// 新しいプロセスをforkして起動し、PTRACE_TRACEMEを設定してから
    /// 指定された実行可能ファイルをexecveで実行します。
    /// プロセスはexecve直後のSIGTRAPで停止した状態で返されます。
    pub fn spawn<P: AsRef<Path>>(program: P, args: &[String]) -> Result<Self> {
        use nix::unistd::{execve, fork, ForkResult};

        let program_path = program
            .as_ref()
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid program path"))?;
        let program_cstring = CString::new(program_path)?;

        let mut cstring_args = vec![program_cstring.clone()];
        for arg in args {
            cstring_args.push(CString::new(arg.as_str())?);
        }

        // 環境変数は親プロセスから継承
        let env: Vec<CString> = std::env::vars()
            .map(|(key, val)| CString::new(format!("{}={}", key, val)).map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()?;

        match unsafe { fork()? } {
            ForkResult::Parent { child } => match waitpid(child, None)? {
                WaitStatus::Stopped(_, Signal::SIGTRAP) => {
                    tracing::debug!(pid = child.as_raw(), program = program_path, "spawned traced process");
                    Ok(Self::from_pid(child))
                }
                status => Err(anyhow::anyhow!(
                    "Unexpected wait status after execve: {:?}",
                    status
                )),
            },
            ForkResult::Child => {
                // 子プロセス: ここからはデバッガのコードに戻らない
                if ptrace::traceme().is_ok() {
                    let _ = execve(&program_cstring, &cstring_args, &env);
                }
                unsafe { nix::libc::_exit(127) }
            }
        }
    }

    /// 既存のプロセスにアタッチし、停止するまで待機する
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        ptrace::attach(pid)?;

        match waitpid(pid, None)? {
            WaitStatus::Stopped(_, _) => {
                tracing::debug!(pid = pid.as_raw(), "attached to process");
                Ok(Self::from_pid(pid))
            }
            status => {
                let _ = ptrace::detach(pid, None);
                Err(anyhow::anyhow!("Unexpected wait status after attach: {:?}", status))
            }
        }
    }

    /// メモリアクセスを取得する
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

impl Tracer for Process {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn peek_word(&self, address: u64) -> nix::Result<u64> {
        self.memory.read_word(address)
    }

    fn poke_word(&self, address: u64, value: u64) -> nix::Result<()> {
        self.memory.write_word(address, value)
    }

    fn get_regs(&self) -> nix::Result<RegisterSnapshot> {
        self.registers.read()
    }

    fn set_regs(&self, regs: RegisterSnapshot) -> nix::Result<()> {
        self.registers.write(regs)
    }

    fn step_and_wait(&self) -> std::result::Result<StopReason, ResumeError> {
        ptrace::step(self.pid, None).map_err(ResumeError::Resume)?;
        let status = waitpid(self.pid, None).map_err(ResumeError::Wait)?;
        Ok(StopReason::from_wait_status(status, true))
    }

    fn cont_and_wait(&self) -> std::result::Result<StopReason, ResumeError> {
        ptrace::cont(self.pid, None).map_err(ResumeError::Resume)?;
        let status = waitpid(self.pid, None).map_err(ResumeError::Wait)?;
        Ok(StopReason::from_wait_status(status, false))
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        let _ = ptrace::detach(self.pid, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_from_wait_status() {
        let pid = Pid::from_raw(1234);

        assert_eq!(
            StopReason::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGTRAP), false),
            StopReason::Breakpoint
        );
        assert_eq!(
            StopReason::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGTRAP), true),
            StopReason::Step
        );
        assert_eq!(
            StopReason::from_wait_status(WaitStatus::Stopped(pid, Signal::SIGSEGV), false),
            StopReason::Signal(Signal::SIGSEGV)
        );
        assert_eq!(
            StopReason::from_wait_status(WaitStatus::Exited(pid, 3), false),
            StopReason::Exited(3)
        );
        assert_eq!(
            StopReason::from_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false), true),
            StopReason::Killed(Signal::SIGKILL)
        );
    }

    #[test]
    fn test_is_terminated() {
        assert!(StopReason::Exited(0).is_terminated());
        assert!(StopReason::Killed(Signal::SIGKILL).is_terminated());
        assert!(!StopReason::Breakpoint.is_terminated());
        assert!(!StopReason::Signal(Signal::SIGINT).is_terminated());
    }
}
