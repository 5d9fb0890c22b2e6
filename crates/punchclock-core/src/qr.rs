//! Identity-number extraction from free-form scan text.
//!
//! Identity cards encode the number inside a longer payload (often a
//! verification URL such as `...?RUN=12345678-5&type=CEDULA`). The parser
//! only extracts a candidate; checksum validation is a separate step.

use regex::Regex;
use std::sync::OnceLock;

static SEPARATED: OnceLock<Regex> = OnceLock::new();
static COMPACT: OnceLock<Regex> = OnceLock::new();

// Neither shape may start inside a longer digit run. Letters, `_` or
// punctuation around the number are fine.
fn separated() -> &'static Regex {
    SEPARATED.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])([0-9]{7,8})-([0-9Kk])").expect("separated pattern is valid")
    })
}

// The compact shape also must not run on into more digits, or a long
// serial number would yield a bogus identifier.
fn compact() -> &'static Regex {
    COMPACT.get_or_init(|| {
        Regex::new(r"(?:^|[^0-9])([0-9]{7,8})([0-9Kk])(?:[^0-9]|$)")
            .expect("compact pattern is valid")
    })
}

/// Extract the first identity number from `text`, in `BODY-C` form.
///
/// A `BODY-C` match wins over a compact `BODYC` one. Returns `None` when
/// neither shape occurs.
pub fn parse(text: &str) -> Option<String> {
    let caps = separated()
        .captures(text)
        .or_else(|| compact().captures(text))?;
    let body = caps.get(1)?.as_str();
    let check = caps.get(2)?.as_str().to_ascii_uppercase();
    tracing::trace!(body, check = %check, "scan payload matched");
    Some(format!("{body}-{check}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separated_form() {
        assert_eq!(parse("12345678-9").as_deref(), Some("12345678-9"));
    }

    #[test]
    fn test_compact_form_gets_separator() {
        assert_eq!(parse("123456789").as_deref(), Some("12345678-9"));
        assert_eq!(parse("12345674").as_deref(), Some("1234567-4"));
    }

    #[test]
    fn test_no_identifier() {
        assert_eq!(parse("no-id-here"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("123456"), None);
    }

    #[test]
    fn test_embedded_in_url() {
        let payload = "https://portal.example.cl/docstatus?RUN=12345678-5&type=CEDULA&serial=A012345678";
        assert_eq!(parse(payload).as_deref(), Some("12345678-5"));
    }

    #[test]
    fn test_lowercase_k_uppercased() {
        assert_eq!(parse("RUN=7654321-k").as_deref(), Some("7654321-K"));
    }

    #[test]
    fn test_separated_wins_over_earlier_compact() {
        assert_eq!(parse("999999999 then 12345678-5").as_deref(), Some("12345678-5"));
    }

    #[test]
    fn test_separated_followed_by_letters() {
        assert_eq!(parse("ID:12345678-5x").as_deref(), Some("12345678-5"));
        assert_eq!(parse("12345678-5abc").as_deref(), Some("12345678-5"));
    }

    #[test]
    fn test_letters_directly_before_number() {
        assert_eq!(parse("RUN12345678-5").as_deref(), Some("12345678-5"));
        assert_eq!(parse("RUT_12345678-5").as_deref(), Some("12345678-5"));
        assert_eq!(parse("RUN123456785").as_deref(), Some("12345678-5"));
    }

    #[test]
    fn test_longer_digit_runs_are_not_identifiers() {
        assert_eq!(parse("1234567890123"), None);
    }
}
