//! テスト用の疑似トレース対象
//!
//! バイト単位のアドレス空間とレジスタセットを持ち、int3 によるトラップを
//! 模倣します。命令長は固定で、実行継続時は 0xCC に当たるまで命令を進めます。
//! マップされていない領域まで進むとプロセスは終了します。

use nix::errno::Errno;
use nix::unistd::Pid;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use tdb_target::{RegisterSnapshot, ResumeError, StopReason, Tracer};

pub const FAKE_PID: i32 = 4242;

/// 発行されたトレース操作の記録
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeOp {
    Peek(u64),
    Poke(u64, u64),
    GetRegs,
    /// 書き戻されたrip
    SetRegs(u64),
    /// ステップ実行した命令の先頭バイト
    Step(u8),
    Cont,
}

fn empty_regs() -> RegisterSnapshot {
    RegisterSnapshot {
        r15: 0,
        r14: 0,
        r13: 0,
        r12: 0,
        rbp: 0,
        rbx: 0,
        r11: 0,
        r10: 0,
        r9: 0,
        r8: 0,
        rax: 0,
        rcx: 0,
        rdx: 0,
        rsi: 0,
        rdi: 0,
        orig_rax: 0,
        rip: 0,
        cs: 0,
        eflags: 0,
        rsp: 0,
        ss: 0,
        fs_base: 0,
        gs_base: 0,
        ds: 0,
        es: 0,
        fs: 0,
        gs: 0,
    }
}

pub struct FakeTracer {
    pid: Pid,
    memory: RefCell<BTreeMap<u64, u8>>,
    regs: RefCell<RegisterSnapshot>,
    instruction_len: u64,
    exit_code: i32,
    exited: Cell<bool>,
    ops: RefCell<Vec<FakeOp>>,
    peek_failures: RefCell<HashMap<u64, Errno>>,
    poke_failures: RefCell<HashMap<u64, Errno>>,
    get_regs_failure: Cell<Option<Errno>>,
    set_regs_failure: Cell<Option<Errno>>,
    step_failure: Cell<Option<Errno>>,
    wait_failure: Cell<Option<Errno>>,
}

impl FakeTracer {
    pub fn new() -> Self {
        Self::with_pid(FAKE_PID)
    }

    pub fn with_pid(pid: i32) -> Self {
        Self {
            pid: Pid::from_raw(pid),
            memory: RefCell::new(BTreeMap::new()),
            regs: RefCell::new(empty_regs()),
            instruction_len: 1,
            exit_code: 0,
            exited: Cell::new(false),
            ops: RefCell::new(Vec::new()),
            peek_failures: RefCell::new(HashMap::new()),
            poke_failures: RefCell::new(HashMap::new()),
            get_regs_failure: Cell::new(None),
            set_regs_failure: Cell::new(None),
            step_failure: Cell::new(None),
            wait_failure: Cell::new(None),
        }
    }

    pub fn with_instruction_len(mut self, len: u64) -> Self {
        self.instruction_len = len;
        self
    }

    /// `start` から `bytes` をマップする
    pub fn map(&self, start: u64, bytes: &[u8]) {
        let mut memory = self.memory.borrow_mut();
        for (i, byte) in bytes.iter().enumerate() {
            memory.insert(start + i as u64, *byte);
        }
    }

    /// `start` から `len` バイトを命令バイト列 0x90, 0x91, ..., 0xbf の繰り返しでマップする
    ///
    /// 0xCC を含まないので、ブレークポイント以外でトラップすることはありません。
    pub fn map_code(&self, start: u64, len: usize) {
        let bytes: Vec<u8> = (0..len).map(|i| 0x90 + (i % 0x30) as u8).collect();
        self.map(start, &bytes);
    }

    pub fn byte_at(&self, address: u64) -> Option<u8> {
        self.memory.borrow().get(&address).copied()
    }

    pub fn pc(&self) -> u64 {
        self.regs.borrow().rip
    }

    pub fn set_pc(&self, pc: u64) {
        self.regs.borrow_mut().rip = pc;
    }

    pub fn ops(&self) -> Vec<FakeOp> {
        self.ops.borrow().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.borrow_mut().clear();
    }

    pub fn fail_peek_at(&self, address: u64, errno: Errno) {
        self.peek_failures.borrow_mut().insert(address, errno);
    }

    pub fn fail_poke_at(&self, address: u64, errno: Errno) {
        self.poke_failures.borrow_mut().insert(address, errno);
    }

    pub fn fail_get_regs(&self, errno: Errno) {
        self.get_regs_failure.set(Some(errno));
    }

    pub fn fail_set_regs(&self, errno: Errno) {
        self.set_regs_failure.set(Some(errno));
    }

    pub fn fail_step(&self, errno: Errno) {
        self.step_failure.set(Some(errno));
    }

    /// 再開は成功させ、その後の待機を失敗させる
    pub fn fail_wait(&self, errno: Errno) {
        self.wait_failure.set(Some(errno));
    }

    pub fn clear_failures(&self) {
        self.peek_failures.borrow_mut().clear();
        self.poke_failures.borrow_mut().clear();
        self.get_regs_failure.set(None);
        self.set_regs_failure.set(None);
        self.step_failure.set(None);
        self.wait_failure.set(None);
    }

    fn record(&self, op: FakeOp) {
        self.ops.borrow_mut().push(op);
    }

    fn check_alive(&self) -> nix::Result<()> {
        if self.exited.get() {
            Err(Errno::ESRCH)
        } else {
            Ok(())
        }
    }

    fn is_mapped(&self, address: u64) -> bool {
        self.memory.borrow().contains_key(&address)
    }

    fn wait_result(&self, stop: StopReason) -> Result<StopReason, ResumeError> {
        match self.wait_failure.get() {
            Some(errno) => Err(ResumeError::Wait(errno)),
            None => Ok(stop),
        }
    }

    fn exit(&self) -> StopReason {
        self.exited.set(true);
        StopReason::Exited(self.exit_code)
    }
}

impl Tracer for FakeTracer {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn peek_word(&self, address: u64) -> nix::Result<u64> {
        self.record(FakeOp::Peek(address));
        self.check_alive()?;
        if let Some(errno) = self.peek_failures.borrow().get(&address) {
            return Err(*errno);
        }

        let memory = self.memory.borrow();
        let mut bytes = [0u8; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = *memory.get(&(address + i as u64)).ok_or(Errno::EIO)?;
        }
        Ok(u64::from_le_bytes(bytes))
    }

    fn poke_word(&self, address: u64, value: u64) -> nix::Result<()> {
        self.record(FakeOp::Poke(address, value));
        self.check_alive()?;
        if let Some(errno) = self.poke_failures.borrow().get(&address) {
            return Err(*errno);
        }
        if !(0..8).all(|i| self.is_mapped(address + i)) {
            return Err(Errno::EIO);
        }
        self.map(address, &value.to_le_bytes());
        Ok(())
    }

    fn get_regs(&self) -> nix::Result<RegisterSnapshot> {
        self.record(FakeOp::GetRegs);
        self.check_alive()?;
        match self.get_regs_failure.get() {
            Some(errno) => Err(errno),
            None => Ok(*self.regs.borrow()),
        }
    }

    fn set_regs(&self, regs: RegisterSnapshot) -> nix::Result<()> {
        self.record(FakeOp::SetRegs(regs.rip));
        self.check_alive()?;
        if let Some(errno) = self.set_regs_failure.get() {
            return Err(errno);
        }
        *self.regs.borrow_mut() = regs;
        Ok(())
    }

    fn step_and_wait(&self) -> Result<StopReason, ResumeError> {
        let pc = self.pc();
        self.record(FakeOp::Step(self.byte_at(pc).unwrap_or(0)));
        self.check_alive().map_err(ResumeError::Resume)?;
        if let Some(errno) = self.step_failure.get() {
            return Err(ResumeError::Resume(errno));
        }

        // int3 を実行すると pc は1バイトだけ進む
        let next = match self.byte_at(pc) {
            Some(0xCC) => pc + 1,
            Some(_) => pc + self.instruction_len,
            None => return self.wait_result(self.exit()),
        };
        self.set_pc(next);
        if self.is_mapped(next) {
            self.wait_result(StopReason::Step)
        } else {
            self.wait_result(self.exit())
        }
    }

    fn cont_and_wait(&self) -> Result<StopReason, ResumeError> {
        self.record(FakeOp::Cont);
        self.check_alive().map_err(ResumeError::Resume)?;

        let mut pc = self.pc();
        while let Some(byte) = self.byte_at(pc) {
            if byte == 0xCC {
                self.set_pc(pc + 1);
                return self.wait_result(StopReason::Breakpoint);
            }
            pc += self.instruction_len;
        }
        self.set_pc(pc);
        self.wait_result(self.exit())
    }
}
