//! デバッガコマンド

use crate::breakpoint::BreakpointId;
use crate::controller::ExecutionController;
use crate::errors::{DebugError, Result};
use crate::parse::{parse_address, parse_value};
use crate::registers::Register;
use tdb_target::{StopReason, Tracer};

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 実行継続
    Continue,
    /// 相対アドレスにブレークポイントを設定
    Break(u64),
    /// 全レジスタ表示
    RegisterDump,
    /// レジスタ読み取り
    RegisterRead(String),
    /// レジスタ書き込み
    RegisterWrite(String, u64),
    /// 相対アドレスのメモリ読み取り
    MemoryRead(u64),
    /// 相対アドレスのメモリ書き込み
    MemoryWrite(u64, u64),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

/// コマンドの実行結果
#[derive(Debug)]
pub enum CommandOutput {
    /// 対象が停止した
    Stopped(StopReason),
    /// ブレークポイントを設定した
    BreakpointSet { id: BreakpointId, address: u64 },
    /// レジスタごとの読み取り結果
    Registers(Vec<(Register, Result<u64>)>),
    /// 読み取った値
    Value(u64),
    /// 書き込み完了
    Written,
    Help,
    Quit,
}

fn invalid(msg: impl Into<String>) -> DebugError {
    DebugError::InvalidArgument(msg.into())
}

impl Command {
    /// トークン化済みのコマンドをパースする
    pub fn parse(command: &str, args: &[&str]) -> Result<Self> {
        match command {
            "continue" | "c" | "cont" => Ok(Command::Continue),
            "breakpoint" | "break" | "b" | "bp" => match args {
                [address] => Ok(Command::Break(parse_address(address)?)),
                _ => Err(invalid("usage: break <address>")),
            },
            "register" | "reg" | "r" => match args {
                ["dump"] => Ok(Command::RegisterDump),
                ["read", name] => Ok(Command::RegisterRead(name.to_string())),
                ["write", name, value] => {
                    Ok(Command::RegisterWrite(name.to_string(), parse_value(value)?))
                }
                _ => Err(invalid(
                    "usage: register dump | register read <name> | register write <name> <value>",
                )),
            },
            "memory" | "mem" | "m" => match args {
                ["read", address] => Ok(Command::MemoryRead(parse_address(address)?)),
                ["write", address, value] => Ok(Command::MemoryWrite(
                    parse_address(address)?,
                    parse_value(value)?,
                )),
                _ => Err(invalid(
                    "usage: memory read <address> | memory write <address> <value>",
                )),
            },
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "q" | "exit" => Ok(Command::Quit),
            other => Err(invalid(format!("unknown command: {}", other))),
        }
    }

    /// 1行のコマンド文字列を空白で区切ってパースする
    pub fn from_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.split_first() {
            Some((command, args)) => Self::parse(command, args),
            None => Err(invalid("empty command")),
        }
    }

    /// コマンドを実行する
    pub fn execute<T: Tracer>(self, controller: &mut ExecutionController<T>) -> Result<CommandOutput> {
        tracing::debug!(command = ?self, "executing command");
        match self {
            Command::Continue => controller.continue_execution().map(CommandOutput::Stopped),
            Command::Break(offset) => {
                let address = controller.session().resolve_address(offset)?;
                let id = controller.set_breakpoint(offset)?;
                Ok(CommandOutput::BreakpointSet { id, address })
            }
            Command::RegisterDump => Ok(CommandOutput::Registers(controller.dump_registers())),
            Command::RegisterRead(name) => controller.read_register(&name).map(CommandOutput::Value),
            Command::RegisterWrite(name, value) => {
                controller.write_register(&name, value)?;
                Ok(CommandOutput::Written)
            }
            Command::MemoryRead(offset) => controller.read_memory(offset).map(CommandOutput::Value),
            Command::MemoryWrite(offset, value) => {
                controller.write_memory(offset, value)?;
                Ok(CommandOutput::Written)
            }
            Command::Help => Ok(CommandOutput::Help),
            Command::Quit => Ok(CommandOutput::Quit),
        }
    }
}
