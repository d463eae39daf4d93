//! Tokenizing SMAL32 object files.
//!
//! Object files are plain text, one load directive per line.
//! This module holds the tokens of that format ([`Token`]),
//! which the loader in [`crate::load`] consumes.
//!
//! Lexing works on raw bytes, so any byte of a malformed file can be
//! pointed at in a diagnostic, even if the file is not UTF-8.

use logos::{Lexer, Logos};

/// A unit of information in an object file.
#[derive(Debug, Logos, PartialEq, Eq, Clone, Copy)]
#[logos(source = [u8])]
pub enum Token {
    /// A store directive: `W`, `T`, `H`, or `B`,
    /// holding the number of bytes it stores (4, 3, 2, or 1).
    #[token("W", |_| 4u8)]
    #[token("T", |_| 3u8)]
    #[token("H", |_| 2u8)]
    #[token("B", |_| 1u8)]
    Store(u8),

    /// `.=`, which sets the location counter.
    #[token(".=")]
    SetLocation,

    /// `R=.`, which sets the relocation base to the location counter.
    #[token("R=.")]
    SetBase,

    /// `S`, which sets the start address.
    #[token("S")]
    Start,

    /// A hex value (e.g., `#0000002A`).
    ///
    /// Only uppercase digits are allowed.
    /// Long values keep their last eight digits.
    #[regex("#[0-9A-F]+", lex_hex)]
    Hex(u32),

    /// A `#` without any digits after it.
    #[token("#")]
    Hash,

    /// `+R`, which adds the relocation base to the preceding value.
    #[token("+R")]
    PlusBase,

    /// ` R`, a value standing for the relocation base itself.
    #[token(" R")]
    Base,

    /// The end of a line.
    #[regex(r"\r?\n")]
    NewLine,

    /// The start of a multi-byte token that was cut short
    /// (`R`, `R=`, `.`, `+`, or a space).
    #[token("R")]
    #[token("R=")]
    #[token(".")]
    #[token("+")]
    #[token(" ")]
    Partial,
}

fn lex_hex(lx: &mut Lexer<'_, Token>) -> u32 {
    lx.slice()[1..].iter()
        .fold(0, |acc, &d| {
            let digit = match d {
                b'0'..=b'9' => d - b'0',
                _ => d - b'A' + 10,
            };
            (acc << 4) | u32::from(digit)
        })
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::Token;

    fn tokens(src: &[u8]) -> Vec<Result<Token, ()>> {
        Token::lexer(src).collect()
    }

    #[test]
    fn test_directives() {
        let src = b"W#0000002A\n.=#10\nR=.\nH#12+R\nB R\r\nS#0\n";
        assert_eq!(tokens(src), [
            Ok(Token::Store(4)), Ok(Token::Hex(0x2A)), Ok(Token::NewLine),
            Ok(Token::SetLocation), Ok(Token::Hex(0x10)), Ok(Token::NewLine),
            Ok(Token::SetBase), Ok(Token::NewLine),
            Ok(Token::Store(2)), Ok(Token::Hex(0x12)), Ok(Token::PlusBase), Ok(Token::NewLine),
            Ok(Token::Store(1)), Ok(Token::Base), Ok(Token::NewLine),
            Ok(Token::Start), Ok(Token::Hex(0)), Ok(Token::NewLine),
        ]);
    }

    #[test]
    fn test_hex_digits() {
        assert_eq!(tokens(b"#FFFFFFFF"), [Ok(Token::Hex(0xFFFF_FFFF))]);
        // digits past the eighth push the earliest ones out
        assert_eq!(tokens(b"#123456789"), [Ok(Token::Hex(0x2345_6789))]);
        // lowercase is not hex
        assert_eq!(tokens(b"#1a"), [Ok(Token::Hex(1)), Err(())]);
        assert_eq!(tokens(b"#\n"), [Ok(Token::Hash), Ok(Token::NewLine)]);
    }

    #[test]
    fn test_partial_tokens() {
        let mut lx = Token::lexer(b"R=x");
        assert_eq!(lx.next(), Some(Ok(Token::Partial)));
        assert_eq!(lx.slice(), b"R=");
        assert_eq!(lx.next(), Some(Err(())));
        assert_eq!(lx.slice(), b"x");

        assert_eq!(tokens(b"#12+X"), [Ok(Token::Hex(0x12)), Ok(Token::Partial), Err(())]);
        assert_eq!(tokens(b" X"), [Ok(Token::Partial), Err(())]);
        assert_eq!(tokens(b".x"), [Ok(Token::Partial), Err(())]);
        // complete tokens still win
        assert_eq!(tokens(b"R=. R+R.="), [
            Ok(Token::SetBase), Ok(Token::Base), Ok(Token::PlusBase), Ok(Token::SetLocation),
        ]);
    }

    #[test]
    fn test_stray_bytes() {
        let mut lx = Token::lexer(b"W#1\nx\n");
        assert_eq!(lx.nth(3), Some(Err(())));
        assert_eq!(lx.slice(), b"x");
        assert_eq!(lx.span(), 4..5);

        // a lone carriage return does not end a line
        assert_eq!(tokens(b"\r"), [Err(())]);
        assert_eq!(tokens(&[0xC1]), [Err(())]);
    }
}
