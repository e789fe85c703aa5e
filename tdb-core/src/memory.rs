//! メモリアクセス
//!
//! 対象プロセスのアドレス空間をワード（8バイト）単位で読み書きします。
//! 1バイトだけ書き換える場合のマスク処理は呼び出し元の責任です。

use crate::errors::{DebugError, Result};
use tdb_target::Tracer;

/// 絶対アドレスから1ワードを読み取る
///
/// 0 は正当な読み取り結果であり、失敗は必ずエラーとして返します。
pub fn read_memory<T: Tracer>(tracer: &T, address: u64) -> Result<u64> {
    tracer
        .peek_word(address)
        .map_err(|e| DebugError::syscall("PTRACE_PEEKDATA", Some(address), e))
}

/// 絶対アドレスに1ワードを書き込む
pub fn write_memory<T: Tracer>(tracer: &T, address: u64, value: u64) -> Result<()> {
    tracer
        .poke_word(address, value)
        .map_err(|e| DebugError::syscall("PTRACE_POKEDATA", Some(address), e))
}

/// ワードの最下位バイトを取り出す
pub(crate) fn low_byte(word: u64) -> u8 {
    (word & 0xff) as u8
}

/// ワードの最下位バイトを差し替える
pub(crate) fn with_low_byte(word: u64, byte: u8) -> u64 {
    (word & !0xff) | byte as u64
}

/// ワードの `index` バイト目（リトルエンディアン）を取り出す
pub(crate) fn byte_of(word: u64, index: u64) -> u8 {
    low_byte(word >> (index * 8))
}

/// ワードの `index` バイト目（リトルエンディアン）を差し替える
pub(crate) fn with_byte(word: u64, index: u64, byte: u8) -> u64 {
    let shift = index * 8;
    (word & !(0xff << shift)) | (byte as u64) << shift
}
