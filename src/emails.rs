//! Email address generation for a registration run.
//!
//! A range is described by two prefixes sharing one alphabetic stem, e.g.
//! `user01`–`user03`. The numeric suffix counts up inclusively, zero-padded
//! to the digit width of the start prefix as written.

use crate::error::{Error, Result};

/// Split a prefix into its alphabetic stem and numeric suffix.
fn split_prefix(prefix: &str) -> Result<(&str, &str)> {
    let digits_at = prefix
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| Error::Config(format!("prefix '{prefix}' has no numeric suffix")))?;
    let (stem, digits) = prefix.split_at(digits_at);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Config(format!(
            "prefix '{prefix}' must end in a purely numeric suffix"
        )));
    }
    Ok((stem, digits))
}

/// Generate the inclusive email list for `[start, end]` under `domain`.
///
/// `domain` includes the `@` (e.g. `"@163.com"`).
pub fn generate_range(start: &str, end: &str, domain: &str) -> Result<Vec<String>> {
    let (start_stem, start_digits) = split_prefix(start)?;
    let (end_stem, end_digits) = split_prefix(end)?;

    if start_stem != end_stem {
        return Err(Error::Config(format!(
            "prefixes '{start}' and '{end}' have different stems"
        )));
    }

    let start_num: u64 = start_digits
        .parse()
        .map_err(|_| Error::Config(format!("suffix '{start_digits}' is not a number")))?;
    let end_num: u64 = end_digits
        .parse()
        .map_err(|_| Error::Config(format!("suffix '{end_digits}' is not a number")))?;

    if start_num > end_num {
        return Err(Error::Config(format!(
            "range start {start_num} is after range end {end_num}"
        )));
    }

    let width = start_digits.len();
    let emails = (start_num..=end_num)
        .map(|n| format!("{start_stem}{n:0width$}{domain}"))
        .collect();
    Ok(emails)
}

/// Local part of an address (everything before the `@`).
pub fn local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}
