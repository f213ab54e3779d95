//! Arena name grammar: splitting a full arena name into its base and
//! trailing number, and the inverse.

/// The canonical base-name token for purely numeric ("public") arenas.
pub const PUBLIC_ARENA_BASE: &str = "(public)";

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ArenaNameError {
    #[error("arena name is empty after trimming")]
    Empty,
    #[error("trailing number overflows i64")]
    NumberOverflow,
    #[error("arena number must be non-negative, got {0}")]
    NegativeNumber(i64),
}

/// Parse a full arena name into `(base_name, number)`.
///
/// Trims surrounding whitespace, strips a trailing run of decimal digits as
/// the number, and treats an empty base as the public namespace.
pub fn parse_arena_name(name: &str) -> Result<(String, i64), ArenaNameError> {
    let trimmed = name.trim();

    let digit_start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());

    let base = &trimmed[..digit_start];
    let number_chars = &trimmed[digit_start..];

    if base.is_empty() && number_chars.is_empty() {
        return Err(ArenaNameError::Empty);
    }

    if base.is_empty() {
        let number: i64 = number_chars
            .parse()
            .map_err(|_| ArenaNameError::NumberOverflow)?;
        return Ok((PUBLIC_ARENA_BASE.to_string(), number));
    }

    let number = if number_chars.is_empty() {
        0
    } else {
        number_chars
            .parse()
            .map_err(|_| ArenaNameError::NumberOverflow)?
    };

    Ok((base.to_string(), number))
}

/// Inverse of [`parse_arena_name`]: render `(base, number)` back to a full
/// arena name.
pub fn create_arena_name(base: &str, number: i64) -> Result<String, ArenaNameError> {
    if number < 0 {
        return Err(ArenaNameError::NegativeNumber(number));
    }

    if base == PUBLIC_ARENA_BASE || base.is_empty() {
        return Ok(number.to_string());
    }

    if number == 0 {
        return Ok(base.to_string());
    }

    Ok(format!("{base}{number}"))
}

/// Whether a name is a "public" (purely numeric) arena.
pub fn is_public(base: &str) -> bool {
    base == PUBLIC_ARENA_BASE
}

/// Whether a name is a private arena (begins with `#`).
pub fn is_private(full_name: &str) -> bool {
    full_name.trim().starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_and_trailing_number() {
        assert_eq!(parse_arena_name("duel3").unwrap(), ("duel".to_string(), 3));
    }

    #[test]
    fn parses_pure_digit_as_public() {
        assert_eq!(parse_arena_name("0").unwrap(), (PUBLIC_ARENA_BASE.to_string(), 0));
    }

    #[test]
    fn parses_private_arena_with_no_trailing_number() {
        assert_eq!(parse_arena_name("#league").unwrap(), ("#league".to_string(), 0));
    }

    #[test]
    fn create_name_omits_zero_suffix() {
        assert_eq!(create_arena_name("duel", 0).unwrap(), "duel");
    }

    #[test]
    fn create_name_public_is_decimal() {
        assert_eq!(create_arena_name(PUBLIC_ARENA_BASE, 7).unwrap(), "7");
    }

    #[test]
    fn create_name_rejects_negative() {
        assert_eq!(create_arena_name("foo", -1), Err(ArenaNameError::NegativeNumber(-1)));
    }

    #[test]
    fn round_trips_for_non_public_base() {
        for (base, n) in [("duel", 3), ("arena", 0), ("x", 42)] {
            let full = create_arena_name(base, n).unwrap();
            assert_eq!(parse_arena_name(&full).unwrap(), (base.to_string(), n));
        }
    }

    #[test]
    fn round_trips_for_public_base() {
        let full = create_arena_name(PUBLIC_ARENA_BASE, 9).unwrap();
        assert_eq!(full, "9");
        assert_eq!(parse_arena_name(&full).unwrap(), (PUBLIC_ARENA_BASE.to_string(), 9));
    }

    #[test]
    fn empty_name_is_rejected() {
        assert_eq!(parse_arena_name("   "), Err(ArenaNameError::Empty));
    }
}
