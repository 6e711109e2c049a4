//! Quoting check for hosts and paths that end up inside match rules.

use crate::error::QuoteError;

/// Accept `value` only if it could sit between double quotes as a valid
/// string literal body: no bare `"`, no control characters, well-formed escapes.
pub fn check_quote_validity(value: &str) -> Result<(), QuoteError> {
    let mut chars = value.char_indices();
    while let Some((at, c)) = chars.next() {
        match c {
            '"' => return Err(QuoteError::BareQuote { at }),
            '\\' => {
                if escape(&mut chars).is_none() {
                    return Err(QuoteError::Escape { at });
                }
            }
            c if c.is_control() => return Err(QuoteError::Control { ch: c, at }),
            _ => {}
        }
    }
    Ok(())
}

fn escape(chars: &mut impl Iterator<Item = (usize, char)>) -> Option<()> {
    let (_, c) = chars.next()?;
    match c {
        'a' | 'b' | 'f' | 'n' | 'r' | 't' | 'v' | '\\' | '"' => Some(()),
        'x' => hex(chars, 2).map(|_| ()),
        'u' => hex(chars, 4).and_then(char::from_u32).map(|_| ()),
        'U' => hex(chars, 8).and_then(char::from_u32).map(|_| ()),
        '0'..='7' => {
            let mut v = c.to_digit(8)?;
            for _ in 0..2 {
                let (_, d) = chars.next()?;
                v = v * 8 + d.to_digit(8)?;
            }
            (v <= 0xff).then_some(())
        }
        _ => None,
    }
}

fn hex(chars: &mut impl Iterator<Item = (usize, char)>, digits: usize) -> Option<u32> {
    let mut v = 0u32;
    for _ in 0..digits {
        let (_, d) = chars.next()?;
        v = v.checked_mul(16)? + d.to_digit(16)?;
    }
    Some(v)
}
