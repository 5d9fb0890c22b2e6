//! National identity-number checksum (modulo 11, cyclic weights 2..=7).
//!
//! Accepts the number with or without separators (`12.345.678-5`,
//! `12345678-5`, `123456785`). Everything here is pure and total: malformed
//! input is simply invalid.

const MIN_BODY_DIGITS: usize = 7;
const MAX_BODY_DIGITS: usize = 8;
const FIRST_WEIGHT: u32 = 2;
const LAST_WEIGHT: u32 = 7;

/// Strip separators and uppercase, then split into (body, check char).
///
/// Returns `None` unless the remainder is 7–8 digits followed by `0-9` or `K`.
fn split(input: &str) -> Option<(String, char)> {
    let cleaned: String = input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let check = cleaned.chars().last()?;
    let body = &cleaned[..cleaned.len() - check.len_utf8()];

    if !(MIN_BODY_DIGITS..=MAX_BODY_DIGITS).contains(&body.len()) {
        return None;
    }
    if !body.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !(check.is_ascii_digit() || check == 'K') {
        return None;
    }
    Some((body.to_string(), check))
}

/// Expected check character for a body of 7–8 digits.
///
/// Digits are weighted right-to-left with `2,3,4,5,6,7,2,3,…` and the sum
/// is reduced modulo 11. Remainders 0 and 1 map to themselves; otherwise
/// the check is `11 - remainder`.
///
/// The `K` branch is never taken: `11 - r == 10` only for `r == 1`, which
/// the first branch already maps to `'1'`. So no body ever expects `K`,
/// and numbers written with a `K` check character never validate.
pub fn check_character(body: &str) -> Option<char> {
    if !(MIN_BODY_DIGITS..=MAX_BODY_DIGITS).contains(&body.len()) {
        return None;
    }

    let mut sum = 0u32;
    let mut weight = FIRST_WEIGHT;
    for c in body.chars().rev() {
        sum += c.to_digit(10)? * weight;
        weight = if weight == LAST_WEIGHT { FIRST_WEIGHT } else { weight + 1 };
    }

    let remainder = sum % 11;
    let check = if remainder < 2 {
        char::from_digit(remainder, 10)?
    } else if 11 - remainder == 10 {
        'K'
    } else {
        char::from_digit(11 - remainder, 10)?
    };
    Some(check)
}

/// Returns `true` when `input` is a well-formed identity number whose check
/// character matches its body.
pub fn validate(input: &str) -> bool {
    match split(input) {
        Some((body, check)) => check_character(&body) == Some(check),
        None => false,
    }
}

/// Canonical `BODY-C` form of a valid identity number.
pub fn normalize(input: &str) -> Option<String> {
    let (body, check) = split(input)?;
    (check_character(&body) == Some(check)).then(|| format!("{body}-{check}"))
}
