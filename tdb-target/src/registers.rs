//! レジスタアクセス機能

use crate::RegisterSnapshot;
use nix::unistd::Pid;

/// レジスタセットの転送
///
/// カーネルは個々のレジスタを転送するインターフェースを持たないため、
/// 読み書きは常にレジスタセット全体で行います。
pub struct Registers {
    pid: Pid,
}

impl Registers {
    /// レジスタアクセスを作成する
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// レジスタを読み取る
    pub fn read(&self) -> nix::Result<RegisterSnapshot> {
        nix::sys::ptrace::getregs(self.pid)
    }

    /// レジスタに書き込む
    pub fn write(&self, regs: RegisterSnapshot) -> nix::Result<()> {
        nix::sys::ptrace::setregs(self.pid, regs)
    }
}
