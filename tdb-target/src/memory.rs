//! メモリアクセス機能

use crate::Result;
use nix::sys::ptrace;
use nix::unistd::Pid;
use std::fs::File;
use std::io::{BufRead, BufReader};

/// メモリマッピング情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// `[stack]` などの擬似パスを含むマッピング名
    pub pathname: Option<String>,
}

impl MemoryMapping {
    /// /proc/pid/maps の1行をパースする
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7ffd3a1c2000-7ffd3a1e3000 rw-p 00000000 00:00 0 [stack]"
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let range = parts.next()?;
        let perms = parts.next()?;

        let (start, end) = range.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;

        let mut flags = perms.chars();
        let readable = flags.next() == Some('r');
        let writable = flags.next() == Some('w');
        let executable = flags.next() == Some('x');

        // offset, dev, inode を読み飛ばす
        let pathname = parts.nth(3).map(str::to_string);

        Some(Self {
            start,
            end,
            readable,
            writable,
            executable,
            pathname,
        })
    }

    /// アドレスがこのマッピングに含まれるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// スタック領域かどうか
    pub fn is_stack(&self) -> bool {
        self.pathname.as_deref() == Some("[stack]")
    }
}

/// maps 形式のテキストをパースする
///
/// 解釈できない行は読み飛ばします。
pub fn parse_maps<R: BufRead>(reader: R) -> Result<Vec<MemoryMapping>> {
    let mut mappings = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if let Some(mapping) = MemoryMapping::parse_line(&line) {
            mappings.push(mapping);
        }
    }
    Ok(mappings)
}

/// メモリアクセス
///
/// ptrace はワード単位でしか転送できないため、読み書きは常に8バイトです。
pub struct Memory {
    pid: Pid,
}

impl Memory {
    /// メモリアクセスを作成する
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// PTRACE_PEEKDATAで1ワードを読み取る
    pub fn read_word(&self, addr: u64) -> nix::Result<u64> {
        let word = ptrace::read(self.pid, addr as ptrace::AddressType)?;
        Ok(word as u64)
    }

    /// PTRACE_POKEDATAで1ワードを書き込む
    pub fn write_word(&self, addr: u64, value: u64) -> nix::Result<()> {
        ptrace::write(
            self.pid,
            addr as ptrace::AddressType,
            value as nix::libc::c_long,
        )
    }

    /// /proc/pid/maps を解析してメモリマッピング情報を取得する
    pub fn mappings(&self) -> Result<Vec<MemoryMapping>> {
        let maps_path = format!("/proc/{}/maps", self.pid);
        let file = File::open(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", maps_path, e))?;
        parse_maps(BufReader::new(file))
    }

    /// スタック領域の先頭アドレスを取得する
    pub fn stack_base(&self) -> Result<u64> {
        self.mappings()?
            .iter()
            .find(|m| m.is_stack())
            .map(|m| m.start)
            .ok_or_else(|| anyhow::anyhow!("Could not find [stack] in memory mappings"))
    }
}
