//! tdb デバッガのコア機能
//!
//! このクレートは、ブレークポイントと実行制御のエンジンを提供します。
//! トラップ命令の埋め込みと除去、ブレークポイントをまたいだ実行再開、
//! トレースインターフェース経由のレジスタ・メモリアクセスを行います。

pub mod breakpoint;
pub mod command;
pub mod controller;
pub mod errors;
pub mod memory;
pub mod parse;
pub mod registers;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoint::{Breakpoint, BreakpointId, BreakpointSet, DEFAULT_MAX_BREAKPOINTS, INT3_OPCODE};
pub use command::{Command, CommandOutput};
pub use controller::ExecutionController;
pub use errors::{DebugError, Result};
pub use registers::Register;
pub use session::{SessionConfig, TraceSession};

// 他のクレートから使用するために再エクスポート
pub use tdb_target::{StopReason, Tracer};
