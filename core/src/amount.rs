//! Fixed-point token amounts
//!
//! The platform token carries 4 implied decimals: a raw amount of
//! `20_000_000` is 2000 display units. Native gas amounts use 18.

use crate::error::AmountError;

/// Implied decimals of the platform token
pub const TOKEN_DECIMALS: u32 = 4;

/// Decimals of the native currency
pub const NATIVE_DECIMALS: u32 = 18;

/// Flat platform fee added to every ticket, in display units
pub const PLATFORM_FEE_UNITS: u128 = 1;

/// `10^decimals`, or `None` on overflow
pub fn unit(decimals: u32) -> Option<u128> {
    10u128.checked_pow(decimals)
}

/// Parse an integer string of raw (smallest) units
pub fn parse_raw(input: &str) -> Result<u128, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    trimmed.parse::<u128>().map_err(|_| AmountError::Overflow)
}

/// Parse a decimal string such as `"0.05"` into raw units at `decimals`
pub fn parse_decimal(input: &str, decimals: u32) -> Result<u128, AmountError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !digits_only(whole) || !digits_only(frac) {
        return Err(AmountError::Invalid(trimmed.to_string()));
    }
    if frac.len() > decimals as usize {
        return Err(AmountError::TooPrecise(decimals));
    }

    let scale = unit(decimals).ok_or(AmountError::Overflow)?;
    let whole_raw = if whole.is_empty() {
        0
    } else {
        whole.parse::<u128>().map_err(|_| AmountError::Overflow)?
    };

    let mut frac_raw = 0u128;
    if !frac.is_empty() {
        let pad = unit(decimals - frac.len() as u32).ok_or(AmountError::Overflow)?;
        frac_raw = frac
            .parse::<u128>()
            .map_err(|_| AmountError::Overflow)?
            .checked_mul(pad)
            .ok_or(AmountError::Overflow)?;
    }

    whole_raw
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_raw))
        .ok_or(AmountError::Overflow)
}

/// Render raw units with `shown` fractional digits (truncating)
pub fn format_units(raw: u128, decimals: u32, shown: u32) -> String {
    let scale = unit(decimals).unwrap_or(1);
    let whole = raw / scale;
    if shown == 0 {
        return whole.to_string();
    }

    let shown = shown.min(decimals);
    let frac = (raw % scale) / unit(decimals - shown).unwrap_or(1);
    format!("{}.{:0width$}", whole, frac, width = shown as usize)
}

/// Render a raw platform-token amount the way the UI shows balances
pub fn format_token(raw: u128) -> String {
    format_units(raw, TOKEN_DECIMALS, 2)
}

/// Platform fee in raw token units
pub fn platform_fee_raw(fee_units: u128, decimals: u32) -> Option<u128> {
    fee_units.checked_mul(unit(decimals)?)
}
