//! パース関連のユーティリティ関数

use crate::errors::{DebugError, Result};

/// 数値リテラルをu64にパース
///
/// 0xプレフィックス付きなら16進数、そうでなければ10進数として解釈し、
/// 10進数として解釈できなければ16進数として解釈を試みます（`ff` など）。
fn parse_number(s: &str, what: &str) -> Result<u64> {
    let s = s.trim();

    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse::<u64>().or_else(|_| u64::from_str_radix(s, 16))
    };

    parsed.map_err(|e| DebugError::InvalidArgument(format!("invalid {} '{}': {}", what, s, e)))
}

/// アドレス文字列をu64にパース
///
/// # Examples
/// ```
/// use tdb_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    parse_number(s, "address")
}

/// 書き込む値の文字列をu64にパース
pub fn parse_value(s: &str) -> Result<u64> {
    parse_number(s, "value")
}
