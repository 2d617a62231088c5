//! The four-token null-delimited wire payload: `section\0name\0value\0type\0`.
//!
//! Every protocol message except the read-by-index family is this shape.
//! [`parse`] borrows tokens directly out of the source buffer; [`format`]
//! writes a fresh buffer from a [`Tokens`] value. Neither copies more than
//! it has to.

use winnow::prelude::*;
use winnow::token::{literal, take_till};

use crate::error::{Error, Result};

/// How many tokens `parse` was able to locate, mirroring the historical
/// four-field layout plus the backward-compatible extra-null case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Buffer was not null-terminated, or had more than five nulls.
    Invalid,
    /// Buffer had zero length.
    Empty,
    /// Only `section` was present.
    Section,
    /// `section` and `name` were present.
    Name,
    /// `section`, `name`, and `value` were present.
    Value,
    /// All four tokens were present.
    Type,
    /// All four tokens were present, followed by a historical extra null.
    ExtraNull,
}

/// Borrowed view of the (up to) four tokens in a parsed payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tokens<'a> {
    pub section: Option<&'a str>,
    pub name: Option<&'a str>,
    pub value: Option<&'a str>,
    pub type_: Option<&'a str>,
}

fn token<'i>(input: &mut &'i [u8]) -> winnow::Result<&'i [u8]> {
    let tok = take_till(0.., |b| b == 0).parse_next(input)?;
    literal(0u8).parse_next(input)?;
    Ok(tok)
}

/// Parse a wire payload into its constituent tokens.
///
/// Borrows into `buf`; returns `Invalid` on malformed UTF-8 rather than
/// lossily recovering, since the wire format is specified as ASCII.
pub fn parse(buf: &[u8]) -> (ParseOutcome, Tokens<'_>) {
    if buf.is_empty() {
        return (ParseOutcome::Empty, Tokens::default());
    }
    if *buf.last().expect("checked non-empty above") != 0 {
        return (ParseOutcome::Invalid, Tokens::default());
    }
    let null_count = buf.iter().filter(|&&b| b == 0).count();
    if null_count == 0 || null_count > 5 {
        return (ParseOutcome::Invalid, Tokens::default());
    }

    let mut input: &[u8] = buf;
    let present = null_count.min(4);
    let mut slots: [Option<&str>; 4] = [None; 4];
    for slot in slots.iter_mut().take(present) {
        let raw: &[u8] = match token.parse_next(&mut input) {
            Ok(raw) => raw,
            Err(_) => return (ParseOutcome::Invalid, Tokens::default()),
        };
        match std::str::from_utf8(raw) {
            Ok(s) => *slot = Some(s),
            Err(_) => return (ParseOutcome::Invalid, Tokens::default()),
        }
    }
    if null_count == 5 {
        // historical extra null after the type field; consume and discard it
        let _: winnow::Result<&[u8]> = token.parse_next(&mut input);
    }

    let outcome = match null_count {
        1 => ParseOutcome::Section,
        2 => ParseOutcome::Name,
        3 => ParseOutcome::Value,
        4 => ParseOutcome::Type,
        5 => ParseOutcome::ExtraNull,
        _ => unreachable!("null_count bounded to 1..=5 above"),
    };
    if outcome == ParseOutcome::ExtraNull {
        tracing::debug!("parsed payload with historical extra-null terminator");
    }
    (
        outcome,
        Tokens {
            section: slots[0],
            name: slots[1],
            value: slots[2],
            type_: slots[3],
        },
    )
}

/// Format tokens into a freshly allocated wire payload.
///
/// Appends tokens in order, stopping at the first `None` (later tokens,
/// even if present, are not written). Errors if the result would exceed
/// `max_len`.
pub fn format(tokens: &Tokens<'_>, max_len: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for tok in [tokens.section, tokens.name, tokens.value, tokens.type_] {
        match tok {
            Some(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            None => break,
        }
    }
    if out.len() > max_len {
        return Err(Error::invalid_argument(format!(
            "formatted payload of {} bytes exceeds max {max_len}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_empty() {
        let (outcome, toks) = parse(b"");
        assert_eq!(outcome, ParseOutcome::Empty);
        assert_eq!(toks, Tokens::default());
    }

    #[test]
    fn unterminated_buffer_is_invalid() {
        let (outcome, toks) = parse(b"sect\0name\0value\0enum,type");
        assert_eq!(outcome, ParseOutcome::Invalid);
        assert_eq!(toks, Tokens::default());
    }

    #[test]
    fn four_tokens_parse_as_type() {
        let (outcome, toks) = parse(b"sect\0name\0value\0type\0");
        assert_eq!(outcome, ParseOutcome::Type);
        assert_eq!(toks.section, Some("sect"));
        assert_eq!(toks.name, Some("name"));
        assert_eq!(toks.value, Some("value"));
        assert_eq!(toks.type_, Some("type"));
    }

    #[test]
    fn extra_null_is_backward_compatible() {
        let (outcome, toks) = parse(b"sect\0name\0value\0enum,type\0\0");
        assert_eq!(outcome, ParseOutcome::ExtraNull);
        assert_eq!(toks.section, Some("sect"));
        assert_eq!(toks.name, Some("name"));
        assert_eq!(toks.value, Some("value"));
        assert_eq!(toks.type_, Some("enum,type"));
    }

    #[test]
    fn bare_nulls_expose_empty_tokens() {
        let (outcome, toks) = parse(b"\0");
        assert_eq!(outcome, ParseOutcome::Section);
        assert_eq!(toks.section, Some(""));
        assert_eq!(toks.name, None);

        let (outcome, _) = parse(b"\0\0\0\0\0");
        assert_eq!(outcome, ParseOutcome::ExtraNull);
    }

    #[test]
    fn more_than_five_nulls_is_invalid() {
        let (outcome, _) = parse(b"\0\0\0\0\0\0");
        assert_eq!(outcome, ParseOutcome::Invalid);
    }

    #[test]
    fn format_stops_at_first_missing_token() {
        let toks = Tokens {
            section: Some("sect"),
            name: Some("name"),
            value: None,
            type_: Some("type"),
        };
        let out = format(&toks, 255).expect("fits in limit");
        assert_eq!(out, b"sect\0name\0");
    }

    // section="section"/name="name", value "Test1" (index 0 of
    // {"Test1","Test2"}), wire tag "enum:Test1,Test2".
    #[test]
    fn enum_value_formats_with_tagged_type() {
        let toks = Tokens {
            section: Some("section"),
            name: Some("name"),
            value: Some("Test1"),
            type_: Some("enum:Test1,Test2"),
        };
        let bytes = format(&toks, 255).expect("fits in limit");
        assert_eq!(bytes, b"section\0name\0Test1\0enum:Test1,Test2\0");
        assert_eq!(bytes.len(), 36);
    }

    #[test]
    fn round_trip() {
        let toks = Tokens {
            section: Some("imu"),
            name: Some("rate"),
            value: Some("100"),
            type_: Some("int"),
        };
        let bytes = format(&toks, 255).expect("fits in limit");
        let (outcome, parsed) = parse(&bytes);
        assert_eq!(outcome, ParseOutcome::Type);
        assert_eq!(parsed, toks);
    }

    #[test]
    fn format_rejects_oversized_payload() {
        let long = "x".repeat(300);
        let toks = Tokens {
            section: Some(&long),
            name: None,
            value: None,
            type_: None,
        };
        let err = format(&toks, 255).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
