//! レジスタアクセス
//!
//! x86_64 のレジスタを名前で読み書きします。
//! カーネルは個々のレジスタを転送するインターフェースを持たないため、
//! 1つのレジスタにアクセスする場合でもレジスタセット全体を転送します。

use crate::errors::{DebugError, Result};
use std::fmt;
use std::str::FromStr;
use tdb_target::{RegisterSnapshot, Tracer};

/// x86_64 レジスタ
///
/// `user_regs_struct` のフィールド順に並んでおり、判別値が記述子テーブルの添字になります。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    R15,
    R14,
    R13,
    R12,
    Rbp,
    Rbx,
    R11,
    R10,
    R9,
    R8,
    Rax,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    OrigRax,
    Rip,
    Cs,
    Eflags,
    Rsp,
    Ss,
    FsBase,
    GsBase,
    Ds,
    Es,
    Fs,
    Gs,
}

/// レジスタ記述子
#[derive(Debug, Clone, Copy)]
pub struct RegisterDescriptor {
    pub register: Register,
    /// DWARFのレジスタ番号（対応するものがなければNone）
    pub dwarf: Option<u16>,
    pub name: &'static str,
}

const fn desc(register: Register, dwarf: Option<u16>, name: &'static str) -> RegisterDescriptor {
    RegisterDescriptor {
        register,
        dwarf,
        name,
    }
}

/// レジスタ記述子テーブル
///
/// `user_regs_struct` のフィールド順に並んでおり、ダンプもこの順で行います。
pub static REGISTER_DESCRIPTORS: [RegisterDescriptor; 27] = [
    desc(Register::R15, Some(15), "r15"),
    desc(Register::R14, Some(14), "r14"),
    desc(Register::R13, Some(13), "r13"),
    desc(Register::R12, Some(12), "r12"),
    desc(Register::Rbp, Some(6), "rbp"),
    desc(Register::Rbx, Some(3), "rbx"),
    desc(Register::R11, Some(11), "r11"),
    desc(Register::R10, Some(10), "r10"),
    desc(Register::R9, Some(9), "r9"),
    desc(Register::R8, Some(8), "r8"),
    desc(Register::Rax, Some(0), "rax"),
    desc(Register::Rcx, Some(2), "rcx"),
    desc(Register::Rdx, Some(1), "rdx"),
    desc(Register::Rsi, Some(4), "rsi"),
    desc(Register::Rdi, Some(5), "rdi"),
    desc(Register::OrigRax, None, "orig_rax"),
    desc(Register::Rip, None, "rip"),
    desc(Register::Cs, Some(51), "cs"),
    desc(Register::Eflags, Some(49), "eflags"),
    desc(Register::Rsp, Some(7), "rsp"),
    desc(Register::Ss, Some(52), "ss"),
    desc(Register::FsBase, Some(58), "fs_base"),
    desc(Register::GsBase, Some(59), "gs_base"),
    desc(Register::Ds, Some(53), "ds"),
    desc(Register::Es, Some(50), "es"),
    desc(Register::Fs, Some(54), "fs"),
    desc(Register::Gs, Some(55), "gs"),
];

impl Register {
    /// テーブル順にすべてのレジスタを列挙する
    pub fn all() -> impl Iterator<Item = Register> {
        REGISTER_DESCRIPTORS.iter().map(|d| d.register)
    }

    fn descriptor(self) -> &'static RegisterDescriptor {
        &REGISTER_DESCRIPTORS[self as usize]
    }

    /// レジスタ名を取得する
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    /// DWARFのレジスタ番号を取得する
    pub fn dwarf_number(self) -> Option<u16> {
        self.descriptor().dwarf
    }

    /// 名前からレジスタを引く
    pub fn from_name(name: &str) -> Option<Register> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.register)
    }

    /// DWARFのレジスタ番号からレジスタを引く
    pub fn from_dwarf(dwarf: u16) -> Option<Register> {
        REGISTER_DESCRIPTORS
            .iter()
            .find(|d| d.dwarf == Some(dwarf))
            .map(|d| d.register)
    }

    /// スナップショットからこのレジスタの値を取り出す
    pub fn project(self, regs: &RegisterSnapshot) -> u64 {
        match self {
            Register::Rax => regs.rax,
            Register::Rbx => regs.rbx,
            Register::Rcx => regs.rcx,
            Register::Rdx => regs.rdx,
            Register::Rdi => regs.rdi,
            Register::Rsi => regs.rsi,
            Register::Rbp => regs.rbp,
            Register::Rsp => regs.rsp,
            Register::R8 => regs.r8,
            Register::R9 => regs.r9,
            Register::R10 => regs.r10,
            Register::R11 => regs.r11,
            Register::R12 => regs.r12,
            Register::R13 => regs.r13,
            Register::R14 => regs.r14,
            Register::R15 => regs.r15,
            Register::Rip => regs.rip,
            Register::Eflags => regs.eflags,
            Register::Cs => regs.cs,
            Register::OrigRax => regs.orig_rax,
            Register::FsBase => regs.fs_base,
            Register::GsBase => regs.gs_base,
            Register::Fs => regs.fs,
            Register::Gs => regs.gs,
            Register::Ss => regs.ss,
            Register::Ds => regs.ds,
            Register::Es => regs.es,
        }
    }

    /// スナップショット内のこのレジスタの値を書き換える
    pub fn inject(self, regs: &mut RegisterSnapshot, value: u64) {
        let slot = match self {
            Register::Rax => &mut regs.rax,
            Register::Rbx => &mut regs.rbx,
            Register::Rcx => &mut regs.rcx,
            Register::Rdx => &mut regs.rdx,
            Register::Rdi => &mut regs.rdi,
            Register::Rsi => &mut regs.rsi,
            Register::Rbp => &mut regs.rbp,
            Register::Rsp => &mut regs.rsp,
            Register::R8 => &mut regs.r8,
            Register::R9 => &mut regs.r9,
            Register::R10 => &mut regs.r10,
            Register::R11 => &mut regs.r11,
            Register::R12 => &mut regs.r12,
            Register::R13 => &mut regs.r13,
            Register::R14 => &mut regs.r14,
            Register::R15 => &mut regs.r15,
            Register::Rip => &mut regs.rip,
            Register::Eflags => &mut regs.eflags,
            Register::Cs => &mut regs.cs,
            Register::OrigRax => &mut regs.orig_rax,
            Register::FsBase => &mut regs.fs_base,
            Register::GsBase => &mut regs.gs_base,
            Register::Fs => &mut regs.fs,
            Register::Gs => &mut regs.gs,
            Register::Ss => &mut regs.ss,
            Register::Ds => &mut regs.ds,
            Register::Es => &mut regs.es,
        };
        *slot = value;
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Register {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self> {
        Register::from_name(s).ok_or_else(|| DebugError::UnknownRegister(s.to_string()))
    }
}

/// レジスタの値を読み取る
pub fn get_register_value<T: Tracer>(tracer: &T, reg: Register) -> Result<u64> {
    let regs = tracer
        .get_regs()
        .map_err(|e| DebugError::syscall("PTRACE_GETREGS", None, e))?;
    Ok(reg.project(&regs))
}

/// レジスタの値を書き込む
///
/// レジスタセット全体を読み取り、該当フィールドだけを書き換えて書き戻します。
pub fn set_register_value<T: Tracer>(tracer: &T, reg: Register, value: u64) -> Result<()> {
    let mut regs = tracer
        .get_regs()
        .map_err(|e| DebugError::syscall("PTRACE_GETREGS", None, e))?;
    reg.inject(&mut regs, value);
    tracer
        .set_regs(regs)
        .map_err(|e| DebugError::syscall("PTRACE_SETREGS", None, e))?;
    tracing::debug!(register = reg.name(), value = format_args!("0x{:x}", value), "register written");
    Ok(())
}

/// DWARFのレジスタ番号でレジスタの値を読み取る
pub fn get_register_value_from_dwarf_register<T: Tracer>(tracer: &T, dwarf: u16) -> Result<u64> {
    let reg = Register::from_dwarf(dwarf)
        .ok_or_else(|| DebugError::UnknownRegister(format!("dwarf register {}", dwarf)))?;
    get_register_value(tracer, reg)
}

/// すべてのレジスタをテーブル順に読み取る
///
/// 個々のレジスタの読み取り失敗はそのレジスタの結果として返します。
pub fn dump_registers<T: Tracer>(tracer: &T) -> Vec<(Register, Result<u64>)> {
    Register::all()
        .map(|reg| (reg, get_register_value(tracer, reg)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTracer;
    use nix::errno::Errno;

    #[test]
    fn test_name_lookup_is_inverse() {
        for desc in REGISTER_DESCRIPTORS.iter() {
            assert_eq!(Register::from_name(desc.name), Some(desc.register));
            assert_eq!(desc.register.name(), desc.name);
        }
        assert_eq!(Register::all().count(), 27);
    }

    #[test]
    fn test_descriptor_index_matches_discriminant() {
        for (index, desc) in REGISTER_DESCRIPTORS.iter().enumerate() {
            assert_eq!(desc.register as usize, index, "{}", desc.name);
        }
        assert_eq!(Register::Gs.name(), "gs");
        assert_eq!(Register::R15.name(), "r15");
        assert_eq!(Register::Rip.dwarf_number(), None);
    }

    #[test]
    fn test_unknown_register() {
        assert_eq!(Register::from_name("not_a_register"), None);
        assert!(matches!(
            "not_a_register".parse::<Register>(),
            Err(DebugError::UnknownRegister(name)) if name == "not_a_register"
        ));
        assert_eq!("rip".parse::<Register>().unwrap(), Register::Rip);
    }

    #[test]
    fn test_dwarf_numbers() {
        assert_eq!(Register::Rax.dwarf_number(), Some(0));
        assert_eq!(Register::Rsp.dwarf_number(), Some(7));
        assert_eq!(Register::Rip.dwarf_number(), None);
        assert_eq!(Register::OrigRax.dwarf_number(), None);
        assert_eq!(Register::from_dwarf(6), Some(Register::Rbp));
        assert_eq!(Register::from_dwarf(1000), None);
    }

    #[test]
    fn test_project_and_inject_touch_one_field() {
        let tracer = FakeTracer::new();
        let mut regs = tracer.get_regs().unwrap();
        for (i, reg) in Register::all().enumerate() {
            reg.inject(&mut regs, 0x1000 + i as u64);
        }
        for (i, reg) in Register::all().enumerate() {
            assert_eq!(reg.project(&regs), 0x1000 + i as u64, "{}", reg);
        }
    }

    #[test]
    fn test_set_then_get() {
        let tracer = FakeTracer::new();
        set_register_value(&tracer, Register::R12, 0xdead_beef).unwrap();
        assert_eq!(get_register_value(&tracer, Register::R12).unwrap(), 0xdead_beef);
        assert_eq!(get_register_value(&tracer, Register::R13).unwrap(), 0);
        assert_eq!(
            get_register_value_from_dwarf_register(&tracer, 12).unwrap(),
            0xdead_beef
        );
    }

    #[test]
    fn test_get_failure_is_reported() {
        let tracer = FakeTracer::new();
        tracer.fail_get_regs(Errno::ESRCH);
        assert!(matches!(
            get_register_value(&tracer, Register::Rax),
            Err(DebugError::SyscallFailure { op: "PTRACE_GETREGS", source: Errno::ESRCH, .. })
        ));
    }

    #[test]
    fn test_set_failure_leaves_registers_unchanged() {
        let tracer = FakeTracer::new();
        tracer.fail_set_regs(Errno::EPERM);
        assert!(set_register_value(&tracer, Register::Rax, 7).is_err());
        assert_eq!(get_register_value(&tracer, Register::Rax).unwrap(), 0);
    }

    #[test]
    fn test_dump_registers_keeps_table_order() {
        let tracer = FakeTracer::new();
        tracer.set_pc(0x401000);
        let dump = dump_registers(&tracer);
        assert_eq!(dump.len(), 27);
        assert_eq!(dump[0].0, Register::R15);
        let (_, rip) = dump.iter().find(|(r, _)| *r == Register::Rip).unwrap();
        assert_eq!(*rip.as_ref().unwrap(), 0x401000);
    }

    #[test]
    fn test_dump_registers_reports_each_failure() {
        let tracer = FakeTracer::new();
        tracer.fail_get_regs(Errno::ESRCH);
        let dump = dump_registers(&tracer);
        assert_eq!(dump.len(), 27);
        assert!(dump.iter().all(|(_, value)| value.is_err()));
    }
}
