//! tdb ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace によるプロセス起動・アタッチ、ワード単位のメモリアクセス、
//! レジスタセットの一括転送、メモリマップの解析を行います。

pub mod memory;
pub mod process;
pub mod registers;
pub mod tracer;

pub use memory::{Memory, MemoryMapping};
pub use process::{Process, StopReason};
pub use registers::Registers;
pub use tracer::{RegisterSnapshot, ResumeError, Tracer};

pub use nix::errno::Errno;
pub use nix::sys::signal::Signal;
pub use nix::unistd::Pid;

/// プロセス起動などセットアップ処理の結果型
pub type Result<T> = anyhow::Result<T>;
