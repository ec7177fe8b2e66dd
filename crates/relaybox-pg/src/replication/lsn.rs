//! LSN (Log Sequence Number) utilities.

use super::error::{WalError, WalResult};

/// Parse LSN from the "X/Y" hex form to u64.
pub fn parse_lsn(lsn: &str) -> WalResult<u64> {
    let Some((high, low)) = lsn.split_once('/') else {
        return Err(WalError::InvalidLsn(lsn.to_string()));
    };

    let high =
        u64::from_str_radix(high, 16).map_err(|_| WalError::InvalidLsn(lsn.to_string()))?;
    let low = u64::from_str_radix(low, 16).map_err(|_| WalError::InvalidLsn(lsn.to_string()))?;

    Ok((high << 32) | low)
}

/// Format a u64 LSN in the "X/Y" hex form.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}
