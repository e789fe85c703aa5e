//! ブレークポイント管理

use crate::errors::{DebugError, Result};
use crate::memory::{low_byte, read_memory, with_low_byte, write_memory};
use nix::unistd::Pid;
use tdb_target::Tracer;

/// INT3命令のオペコード
pub const INT3_OPCODE: u8 = 0xCC;

const WORD_SIZE: u64 = 8;

/// ブレークポイント数の既定の上限
pub const DEFAULT_MAX_BREAKPOINTS: usize = 1024;

/// ブレークポイントID
pub type BreakpointId = usize;

/// ソフトウェアブレークポイント（INT3命令）
///
/// `enabled` が真である間だけ、`address` のバイトは 0xCC に置き換わっており、
/// `saved_byte` に元のバイトが保存されています。
#[derive(Debug, Clone)]
pub struct Breakpoint {
    id: BreakpointId,
    pid: Pid,
    address: u64,
    enabled: bool,
    saved_byte: u8,
}

impl Breakpoint {
    /// 無効状態のブレークポイントを作成する
    pub fn new(id: BreakpointId, pid: Pid, address: u64) -> Self {
        Self {
            id,
            pid,
            address,
            enabled: false,
            saved_byte: 0,
        }
    }

    pub fn id(&self) -> BreakpointId {
        self.id
    }

    /// 所有プロセスのIDを取得する
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// ブレークポイントのアドレスを取得する
    pub fn address(&self) -> u64 {
        self.address
    }

    /// ブレークポイントが有効かどうか
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 置き換えた元のバイトを取得する（有効な間のみ）
    pub fn saved_byte(&self) -> Option<u8> {
        self.enabled.then_some(self.saved_byte)
    }

    fn check_owner<T: Tracer>(&self, tracer: &T) -> Result<()> {
        let actual = tracer.pid();
        if actual != self.pid {
            return Err(DebugError::ProcessMismatch {
                expected: self.pid,
                actual,
            });
        }
        Ok(())
    }

    /// ブレークポイントを設定する
    ///
    /// アドレスを含むワードを読み、最下位バイトを0xCC（INT3）で置き換えて書き戻します。
    /// 読み書きのどちらかが失敗した場合は無効状態のままです。
    /// 既に有効な場合は、保存済みのバイトをトラップ自身で上書きしないよう拒否します。
    pub fn enable<T: Tracer>(&mut self, tracer: &T) -> Result<()> {
        self.check_owner(tracer)?;
        if self.enabled {
            return Err(DebugError::AddressConflict(self.address));
        }

        let word = read_memory(tracer, self.address)?;
        let original = low_byte(word);
        write_memory(tracer, self.address, with_low_byte(word, INT3_OPCODE))?;

        self.saved_byte = original;
        self.enabled = true;
        tracing::debug!(
            address = format_args!("0x{:x}", self.address),
            saved = format_args!("0x{:02x}", original),
            "breakpoint enabled"
        );
        Ok(())
    }

    /// 有効なブレークポイントの元のバイトを差し替える
    ///
    /// トラップを残したままそのアドレスに書き込んだ場合に使います。
    pub(crate) fn replace_saved_byte(&mut self, byte: u8) {
        if self.enabled {
            self.saved_byte = byte;
        }
    }

    /// ブレークポイントを解除する
    ///
    /// INT3命令を元のバイトで置き換えます。無効状態なら何もしません。
    /// 失敗した場合は有効状態のまま残し、再試行できるようにします。
    pub fn disable<T: Tracer>(&mut self, tracer: &T) -> Result<()> {
        self.check_owner(tracer)?;
        if !self.enabled {
            return Ok(());
        }

        let word = read_memory(tracer, self.address)?;
        write_memory(tracer, self.address, with_low_byte(word, self.saved_byte))?;

        self.enabled = false;
        tracing::debug!(address = format_args!("0x{:x}", self.address), "breakpoint disabled");
        Ok(())
    }
}

/// 上限付きのブレークポイント集合
///
/// 作成順を保持します。上限を超える追加は拒否します。
#[derive(Debug)]
pub struct BreakpointSet {
    breakpoints: Vec<Breakpoint>,
    capacity: usize,
    next_id: BreakpointId,
}

impl BreakpointSet {
    /// 上限を指定してブレークポイント集合を作成する
    pub fn new(capacity: usize) -> Self {
        Self {
            breakpoints: Vec::new(),
            capacity,
            next_id: 1,
        }
    }

    /// 次に割り当てるID
    pub fn next_id(&self) -> BreakpointId {
        self.next_id
    }

    /// ブレークポイントを末尾に追加する
    pub fn insert(&mut self, breakpoint: Breakpoint) -> Result<BreakpointId> {
        if self.is_full() {
            return Err(DebugError::CapacityExceeded(self.capacity));
        }
        let id = breakpoint.id();
        self.next_id = self.next_id.max(id + 1);
        self.breakpoints.push(breakpoint);
        Ok(id)
    }

    /// 指定アドレスの有効なブレークポイントを取得する
    pub fn enabled_at(&self, address: u64) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.is_enabled() && bp.address() == address)
    }

    /// 指定アドレスの有効なブレークポイントを可変参照で取得する
    pub fn enabled_at_mut(&mut self, address: u64) -> Option<&mut Breakpoint> {
        self.breakpoints
            .iter_mut()
            .find(|bp| bp.is_enabled() && bp.address() == address)
    }

    /// ワード `[address, address + 8)` に含まれる有効なブレークポイントを、
    /// ワード内のバイト位置と組にして返す
    pub fn enabled_in_word(&self, address: u64) -> impl Iterator<Item = (u64, &Breakpoint)> {
        self.breakpoints.iter().filter_map(move |bp| {
            let index = bp.address().wrapping_sub(address);
            (bp.is_enabled() && index < WORD_SIZE).then_some((index, bp))
        })
    }

    pub(crate) fn enabled_in_word_mut(
        &mut self,
        address: u64,
    ) -> impl Iterator<Item = (u64, &mut Breakpoint)> {
        self.breakpoints.iter_mut().filter_map(move |bp| {
            let index = bp.address().wrapping_sub(address);
            (bp.is_enabled() && index < WORD_SIZE).then_some((index, bp))
        })
    }

    /// ブレークポイントを取得する
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.id() == id)
    }

    /// 全てのブレークポイントを作成順に取得する
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.iter()
    }

    /// ブレークポイントの数を取得する
    pub fn len(&self) -> usize {
        self.breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.breakpoints.len() >= self.capacity
    }

    /// 全てのブレークポイントを解除して集合を空にする
    ///
    /// 解除に失敗したものがあっても残りの解除を続け、失敗の一覧を返します。
    pub fn disable_all<T: Tracer>(&mut self, tracer: &T) -> Vec<DebugError> {
        let mut failures = Vec::new();
        for bp in self.breakpoints.iter_mut() {
            if let Err(e) = bp.disable(tracer) {
                tracing::warn!(
                    address = format_args!("0x{:x}", bp.address()),
                    error = %e,
                    "failed to disable breakpoint"
                );
                failures.push(e);
            }
        }
        self.breakpoints.clear();
        failures
    }
}

impl Default for BreakpointSet {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BREAKPOINTS)
    }
}
