//! 実行制御
//!
//! ブレークポイントの設定と、ブレークポイントを再トリガーせずに
//! 実行を再開する処理を担当します。

use crate::breakpoint::{Breakpoint, BreakpointId, INT3_OPCODE};
use crate::errors::{DebugError, Result};
use crate::memory;
use crate::registers::{self, Register};
use crate::session::TraceSession;
use tdb_target::{ResumeError, StopReason, Tracer};

/// 実行制御器
///
/// セッションを所有し、対象プロセスへの再開と待機を一組ずつ発行します。
pub struct ExecutionController<T: Tracer> {
    session: TraceSession<T>,
}

impl<T: Tracer> ExecutionController<T> {
    /// 実行制御器を作成する
    pub fn new(session: TraceSession<T>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &TraceSession<T> {
        &self.session
    }

    /// プログラムカウンタ（RIP）を取得する
    pub fn pc(&self) -> Result<u64> {
        registers::get_register_value(self.session.tracer(), Register::Rip)
    }

    /// プログラムカウンタ（RIP）を設定する
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        registers::set_register_value(self.session.tracer(), Register::Rip, pc)
    }

    /// 基準アドレスからの相対アドレスにブレークポイントを設定する
    pub fn set_breakpoint(&mut self, offset: u64) -> Result<BreakpointId> {
        let address = self.session.resolve_address(offset)?;
        self.set_breakpoint_at(address)
    }

    /// 絶対アドレスにブレークポイントを設定する
    ///
    /// 有効化に失敗したブレークポイントは集合に追加しません。
    pub fn set_breakpoint_at(&mut self, address: u64) -> Result<BreakpointId> {
        let (tracer, breakpoints) = self.session.parts_mut();

        if breakpoints.enabled_at(address).is_some() {
            return Err(DebugError::AddressConflict(address));
        }
        if breakpoints.is_full() {
            return Err(DebugError::CapacityExceeded(breakpoints.capacity()));
        }

        let mut bp = Breakpoint::new(breakpoints.next_id(), tracer.pid(), address);
        bp.enable(tracer)?;
        let id = breakpoints.insert(bp)?;

        tracing::info!(id, address = format_args!("0x{:x}", address), "breakpoint set");
        Ok(id)
    }

    /// 直前にヒットしたブレークポイントをまたいで1命令進める
    ///
    /// トラップが発火するとpcはブレークポイントの1バイト後ろを指します。
    /// pc - 1 に有効なブレークポイントがあれば、pcを巻き戻し、元のバイトを戻し、
    /// 1命令ステップ実行してから、ブレークポイントを再設定します。
    /// ブレークポイント上にいなければ何もせず `None` を返します。
    pub fn step_over_current_breakpoint(&mut self) -> Result<Option<StopReason>> {
        let pc = self.pc()?;
        let Some(address) = pc.checked_sub(1) else {
            return Ok(None);
        };

        let (tracer, breakpoints) = self.session.parts_mut();
        let Some(bp) = breakpoints.enabled_at_mut(address) else {
            return Ok(None);
        };

        registers::set_register_value(tracer, Register::Rip, address)?;

        if let Err(e) = bp.disable(tracer) {
            restore_pc(tracer, pc);
            return Err(e);
        }

        let stop = match tracer.step_and_wait() {
            Ok(stop) => stop,
            Err(ResumeError::Resume(errno)) => {
                // 対象は動いていないので、ステップ前の状態に戻す
                reenable_after_failure(bp, tracer);
                restore_pc(tracer, pc);
                return Err(DebugError::syscall("PTRACE_SINGLESTEP", Some(address), errno));
            }
            Err(ResumeError::Wait(errno)) => {
                // ステップ済みかもしれないのでpcには触れない
                reenable_after_failure(bp, tracer);
                return Err(DebugError::syscall("waitpid", Some(address), errno));
            }
        };

        if stop.is_terminated() {
            tracing::debug!(?stop, "target terminated while stepping over breakpoint");
            return Ok(Some(stop));
        }

        bp.enable(tracer)?;
        tracing::debug!(address = format_args!("0x{:x}", address), ?stop, "stepped over breakpoint");
        Ok(Some(stop))
    }

    /// 実行を継続し、次の停止まで待機する
    ///
    /// ブレークポイント上で停止している場合は先にまたいでから再開します。
    /// またいでいる間にプロセスが終了した場合は、再開せずにその停止を返します。
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        if let Some(stop) = self.step_over_current_breakpoint()? {
            if stop.is_terminated() {
                return Ok(stop);
            }
        }

        let stop = self
            .session
            .tracer()
            .cont_and_wait()
            .map_err(|e| match e {
                ResumeError::Resume(errno) => DebugError::syscall("PTRACE_CONT", None, errno),
                ResumeError::Wait(errno) => DebugError::syscall("waitpid", None, errno),
            })?;
        tracing::info!(?stop, "target stopped");
        Ok(stop)
    }

    /// 相対アドレスから1ワードを読み取る
    pub fn read_memory(&self, offset: u64) -> Result<u64> {
        let address = self.session.resolve_address(offset)?;
        memory::read_memory(self.session.tracer(), address)
    }

    /// 相対アドレスに1ワードを書き込む
    ///
    /// 書き込むワードに有効なブレークポイントが含まれる場合、そのバイトは
    /// 0xCC のまま残し、書き込もうとした値を元のバイトとして保存します。
    /// 読み取りは対象のメモリをそのまま返すので、そのバイトは 0xCC に見えます。
    pub fn write_memory(&mut self, offset: u64, value: u64) -> Result<()> {
        let address = self.session.resolve_address(offset)?;
        let (tracer, breakpoints) = self.session.parts_mut();

        let word = breakpoints
            .enabled_in_word(address)
            .fold(value, |word, (index, _)| memory::with_byte(word, index, INT3_OPCODE));
        memory::write_memory(tracer, address, word)?;

        for (index, bp) in breakpoints.enabled_in_word_mut(address) {
            bp.replace_saved_byte(memory::byte_of(value, index));
            tracing::debug!(
                id = bp.id(),
                address = format_args!("0x{:x}", bp.address()),
                "write covered breakpoint, trap kept"
            );
        }
        Ok(())
    }

    /// 名前でレジスタを読み取る
    pub fn read_register(&self, name: &str) -> Result<u64> {
        let reg: Register = name.parse()?;
        registers::get_register_value(self.session.tracer(), reg)
    }

    /// 名前でレジスタに書き込む
    pub fn write_register(&self, name: &str, value: u64) -> Result<()> {
        let reg: Register = name.parse()?;
        registers::set_register_value(self.session.tracer(), reg, value)
    }

    /// 全レジスタを読み取る
    pub fn dump_registers(&self) -> Vec<(Register, Result<u64>)> {
        registers::dump_registers(self.session.tracer())
    }

    /// セッションを終了し、トレース対象を返す
    pub fn end(self) -> T {
        self.session.end()
    }
}

fn reenable_after_failure<T: Tracer>(bp: &mut Breakpoint, tracer: &T) {
    if let Err(e) = bp.enable(tracer) {
        tracing::warn!(error = %e, "failed to re-enable breakpoint after step failure");
    }
}

fn restore_pc<T: Tracer>(tracer: &T, pc: u64) {
    if let Err(e) = registers::set_register_value(tracer, Register::Rip, pc) {
        tracing::warn!(error = %e, "failed to restore program counter");
    }
}
