//! Parameter validation helpers shared across the workspace.

use crate::error::{Error, Result};

/// Check that a byte slice has exactly the expected length.
pub fn require_exact_len(buf: &[u8], field: &'static str, expected: usize) -> Result<()> {
    if buf.len() != expected {
        return Err(Error::validation(
            field,
            format!("expected {} bytes, got {}", expected, buf.len()),
        ));
    }
    Ok(())
}

/// Check that a value sits inside an inclusive range.
pub fn require_in_range<T>(value: T, field: &'static str, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(Error::validation(
            field,
            format!("{value} outside the accepted range {min}..={max}"),
        ));
    }
    Ok(())
}

/// Check that a slice length sits inside an inclusive range.
pub fn require_len_in_range(
    buf: &[u8],
    field: &'static str,
    min: usize,
    max: usize,
) -> Result<()> {
    require_in_range(buf.len(), field, min, max)
}
