//! Loading SMAL32 object files into memory.
//!
//! An object file is a list of load directives, one per line:
//!
//! | directive | effect |
//! |-----------|--------|
//! | `W` *value*, `T` *value*, `H` *value*, `B` *value* | store the low 4, 3, 2, or 1 bytes of the value (little-endian) at the location counter, and advance it |
//! | `.=` *value* | set the location counter |
//! | `R=.` | set the relocation base to the location counter |
//! | `S` *value* | set the start address (which must be even) |
//!
//! A value is `#` followed by uppercase hex digits, optionally followed by `+R`
//! (which adds the relocation base), or `␣R` (the relocation base itself).
//!
//! ```
//! use hawk_emu::load::Loader;
//! use hawk_emu::sim::mem::{Mem, MemInit};
//!
//! let mut mem = Mem::new(0x20000, 0x10000, MemInit::Zeroed);
//! let mut loader = Loader::new();
//! loader.load(&mut mem, b"R=.\nW#12345678\nH#0004+R\nS#00000000\n").unwrap();
//!
//! assert_eq!(mem.get_raw(0), 0x12345678);
//! assert_eq!(mem.get_raw(4), 0x0004);
//! assert_eq!(loader.start(), Some(0));
//! ```
//!
//! Loading writes memory directly, so object files may fill ROM.
//! The location counter and relocation base carry over from one file to the next.
pub mod lex;

use std::borrow::Cow;
use std::fmt::Write;

use logos::{Lexer, Logos};

use crate::err::ErrSpan;
use crate::sim::mem::Mem;
use lex::Token;

/// A byte that turned up where it should not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Found {
    /// A byte of the object file.
    Byte(u8),
    /// The end of the object file.
    Eof,
}
impl std::fmt::Display for Found {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn render(f: &mut std::fmt::Formatter<'_>, c: u8) -> std::fmt::Result {
            match c {
                c if c < b' ' => {
                    f.write_char('^')?;
                    f.write_char(char::from(c + b'@'))
                },
                c if c > 0x7F => {
                    f.write_char('+')?;
                    render(f, c - 0x80)
                },
                c => f.write_char(char::from(c)),
            }
        }

        match *self {
            Found::Byte(c) => render(f, c),
            Found::Eof => f.write_str("EOF"),
        }
    }
}

/// Kinds of errors that can occur while loading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadErrKind {
    /// The object file had something other than what the format allows at this point.
    #[error("found '{found}' where {expected} expected")]
    Unexpected {
        /// What was found.
        found: Found,
        /// A description of what was allowed.
        expected: &'static str
    },
    /// A store was aimed outside of memory.
    #[error("invalid load address")]
    InvalidAddress {
        /// The address of the byte that could not be stored.
        addr: u32
    },
    /// The start address is odd.
    #[error("odd start address")]
    OddStart {
        /// The start address.
        addr: u32
    },
}

/// Error from loading an object file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: ** {kind} in object file **")]
pub struct LoadErr {
    /// What went wrong.
    pub kind: LoadErrKind,
    /// The line (starting at 1) where it went wrong.
    pub line: usize,
    /// The bytes of the object file where it went wrong.
    pub span: ErrSpan,
}
impl crate::err::Error for LoadErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<Cow<str>> {
        match &self.kind {
            LoadErrKind::Unexpected { expected: "load directive", .. } => Some("lines start with W, T, H, B, .=, R=., or S".into()),
            LoadErrKind::Unexpected { expected: "load value", .. }     => Some("a load value is #<hex digits>, optionally followed by +R, or ' R'".into()),
            LoadErrKind::Unexpected { expected: "hex digit", .. }      => Some("hex digits are 0-9 and uppercase A-F".into()),
            LoadErrKind::Unexpected { .. }                              => None,
            LoadErrKind::InvalidAddress { addr }                        => Some(format!("{addr:#010X} is outside memory").into()),
            LoadErrKind::OddStart { addr }                              => Some(format!("{addr:#010X} is not halfword aligned").into()),
        }
    }
}

/// A cursor over the tokens of one object file.
struct Cursor<'s> {
    lexer: Lexer<'s, Token>,
    line: usize,
}
impl<'s> Cursor<'s> {
    fn new(src: &'s [u8]) -> Self {
        Self { lexer: Token::lexer(src), line: 1 }
    }

    fn next(&mut self) -> Option<Result<Token, ()>> {
        self.lexer.next()
    }

    fn error(&self, kind: LoadErrKind, span: ErrSpan) -> LoadErr {
        LoadErr { kind, line: self.line, span }
    }

    /// Builds the error for the token just taken (or the end of the file).
    fn unexpected(&self, tok: Option<Result<Token, ()>>, expected: &'static str) -> LoadErr {
        let (found, span) = match tok {
            Some(_) => (Found::Byte(self.lexer.slice()[0]), self.lexer.span()),
            None => {
                let end = self.lexer.source().len();
                (Found::Eof, end..end)
            }
        };
        self.error(LoadErrKind::Unexpected { found, expected }, span)
    }

    /// Builds the error for a token that stopped short.
    ///
    /// If the token is a prefix allowed here (named by its first byte),
    /// the byte after it is the one at fault.
    fn cut_short(&self, tok: Option<Result<Token, ()>>, allowed: &[u8], expected: &'static str) -> LoadErr {
        if tok != Some(Ok(Token::Partial)) || !allowed.contains(&self.lexer.slice()[0]) {
            return self.unexpected(tok, expected);
        }

        let at = self.lexer.span().end;
        let found = match self.lexer.source().get(at) {
            Some(&b) => Found::Byte(b),
            None => Found::Eof,
        };
        let span = at..usize::min(at + 1, self.lexer.source().len());
        self.error(LoadErrKind::Unexpected { found, expected }, span)
    }

    fn end_of_line(&mut self) -> Result<(), LoadErr> {
        match self.next() {
            Some(Ok(Token::NewLine)) => Ok(()),
            t => Err(self.unexpected(t, "EOL")),
        }
    }

    /// Parses a load value, through the end of its line.
    fn value(&mut self, base: u32) -> Result<u32, LoadErr> {
        match self.next() {
            Some(Ok(Token::Hex(value))) => match self.next() {
                Some(Ok(Token::NewLine)) => Ok(value),
                Some(Ok(Token::PlusBase)) => {
                    self.end_of_line()?;
                    Ok(value.wrapping_add(base))
                },
                t => Err(self.cut_short(t, b"+", "hex digit")),
            },
            Some(Ok(Token::Hash)) => {
                let t = self.next();
                Err(self.unexpected(t, "hex digit"))
            },
            Some(Ok(Token::Base)) => {
                self.end_of_line()?;
                Ok(base)
            },
            t => Err(self.cut_short(t, b" ", "load value")),
        }
    }
}

/// Loads object files into memory.
///
/// The loader keeps its location counter, relocation base,
/// and start address between files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Loader {
    lc: u32,
    rb: u32,
    start: Option<u32>,
}
impl Loader {
    /// Creates a loader with the location counter and relocation base at 0.
    pub fn new() -> Self {
        Default::default()
    }

    /// The location counter.
    pub fn location(&self) -> u32 {
        self.lc
    }
    /// The relocation base.
    pub fn base(&self) -> u32 {
        self.rb
    }
    /// The start address set by the last `S` directive, if any.
    pub fn start(&self) -> Option<u32> {
        self.start
    }

    fn store_byte(&mut self, mem: &mut Mem, byte: u8) -> Result<(), LoadErrKind> {
        if self.lc >= mem.len() {
            return Err(LoadErrKind::InvalidAddress { addr: self.lc });
        }
        mem.write_byte(self.lc, byte);
        self.lc = self.lc.wrapping_add(1);
        Ok(())
    }

    /// Loads one object file.
    ///
    /// # Errors
    ///
    /// Loading stops at the first malformed line. Everything before it stays loaded.
    pub fn load(&mut self, mem: &mut Mem, src: &[u8]) -> Result<(), LoadErr> {
        let mut cursor = Cursor::new(src);
        let mut stored = 0usize;

        while let Some(tok) = cursor.next() {
            let line_start = cursor.lexer.span().start;

            match tok {
                Ok(Token::Store(size)) => {
                    let value = cursor.value(self.rb)?;
                    for byte in value.to_le_bytes().into_iter().take(usize::from(size)) {
                        self.store_byte(mem, byte)
                            .map_err(|kind| cursor.error(kind, line_start..cursor.lexer.span().end))?;
                    }
                    stored += usize::from(size);
                },
                Ok(Token::SetLocation) => {
                    self.lc = cursor.value(self.rb)?;
                    log::debug!("location counter set to {:#010X}", self.lc);
                },
                Ok(Token::SetBase) => {
                    cursor.end_of_line()?;
                    self.rb = self.lc;
                    log::debug!("relocation base set to {:#010X}", self.rb);
                },
                Ok(Token::Start) => {
                    let addr = cursor.value(self.rb)?;
                    if addr & 1 != 0 {
                        let span = line_start..cursor.lexer.span().end;
                        return Err(cursor.error(LoadErrKind::OddStart { addr }, span));
                    }
                    self.start = Some(addr);
                },
                t => return Err(cursor.cut_short(Some(t), b"R.", "load directive")),
            }

            cursor.line += 1;
        }

        log::info!("loaded {stored} bytes in {} lines", cursor.line - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::mem::MemInit;

    use super::*;

    fn mem() -> Mem {
        Mem::new(0x20000, 0x10000, MemInit::Zeroed)
    }
    fn load_err(src: &[u8]) -> LoadErr {
        Loader::new().load(&mut mem(), src).unwrap_err()
    }

    #[test]
    fn test_location_counter() {
        let mut mem = mem();
        let mut loader = Loader::new();
        loader.load(&mut mem, b"W#0000002A\n.=#00000010\nB#FF\n").unwrap();

        assert_eq!(mem.get_raw(0), 0x2A);
        assert_eq!(mem.read_byte(0x10), 0xFF);
        assert_eq!(mem.get_raw(0x10), 0xFF);
        assert_eq!(loader.location(), 0x11);
    }

    #[test]
    fn test_store_sizes() {
        let mut mem = mem();
        let mut loader = Loader::new();
        loader.load(&mut mem, b"T#AABBCCDD\nH#1234\nB#56\nB#78\nW#9ABCDEF0\n").unwrap();

        // T stores three bytes, so H straddles the first two words
        assert_eq!(mem.get_raw(0), 0x34BB_CCDD);
        assert_eq!(mem.get_raw(4), 0xF078_5612);
        assert_eq!(mem.read_byte(10), 0x9A);
        assert_eq!(loader.location(), 11);
    }

    #[test]
    fn test_relocation() {
        let mut mem = mem();
        let mut loader = Loader::new();
        let src = b".=#00010000\nR=.\nW#00000008+R\nW R\r\nS#00000004+R\n";
        loader.load(&mut mem, src).unwrap();

        assert_eq!(loader.base(), 0x10000);
        assert_eq!(mem.get_raw(0x10000), 0x10008);
        assert_eq!(mem.get_raw(0x10004), 0x10000);
        assert_eq!(loader.start(), Some(0x10004));

        // the loader state carries into the next file
        loader.load(&mut mem, b"W #00000001+R\n").unwrap_err();
        loader.load(&mut mem, b"B#01+R\n").unwrap();
        assert_eq!(mem.read_byte(0x10008), 0x01);
    }

    #[test]
    fn test_unexpected() {
        let err = load_err(b"W#1\nX#2\n");
        assert_eq!(err.line, 2);
        assert_eq!(err.span, 4..5);
        assert_eq!(err.to_string(), "line 2: ** found 'X' where load directive expected in object file **");

        let err = load_err(b"W#1g\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'g'), expected: "hex digit" });

        let err = load_err(b"W#\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'\n'), expected: "hex digit" });

        let err = load_err(b"W%\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'%'), expected: "load value" });

        let err = load_err(b"R=.x\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'x'), expected: "EOL" });

        // a token cut short points at the byte that broke it
        let err = load_err(b"W#1\nR=x\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'x'), expected: "load directive" });
        assert_eq!(err.span, 6..7);
        assert_eq!(err.to_string(), "line 2: ** found 'x' where load directive expected in object file **");

        let err = load_err(b"W#12+X\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'X'), expected: "hex digit" });
        let err = load_err(b"W X\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'X'), expected: "load value" });
        let err = load_err(b".x\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'x'), expected: "load directive" });
        let err = load_err(b"R");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Eof, expected: "load directive" });
        assert_eq!(err.span, 1..1);

        // a prefix that does not belong is itself the fault
        let err = load_err(b"W+R\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'+'), expected: "load value" });
        let err = load_err(b"+R\n");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Byte(b'+'), expected: "load directive" });

        // the last line must end
        let err = load_err(b"W#1");
        assert_eq!(err.kind, LoadErrKind::Unexpected { found: Found::Eof, expected: "hex digit" });
        assert_eq!(err.span, 3..3);

        // blank lines are not allowed
        let err = load_err(b"\n");
        assert_eq!(err.to_string(), "line 1: ** found '^J' where load directive expected in object file **");
    }

    #[test]
    fn test_found_rendering() {
        assert_eq!(Found::Byte(b'q').to_string(), "q");
        assert_eq!(Found::Byte(0x01).to_string(), "^A");
        assert_eq!(Found::Byte(0xC1).to_string(), "+A");
        assert_eq!(Found::Byte(0x8A).to_string(), "+^J");
        assert_eq!(Found::Eof.to_string(), "EOF");
    }

    #[test]
    fn test_bad_addresses() {
        let mut mem = mem();
        let mut loader = Loader::new();
        let err = loader.load(&mut mem, b".=#0001FFFE\nW#11223344\n").unwrap_err();
        assert_eq!(err.kind, LoadErrKind::InvalidAddress { addr: 0x20000 });
        assert_eq!(err.line, 2);
        // bytes before the end of memory were stored
        assert_eq!(mem.read_byte(0x1FFFF), 0x33);

        let err = load_err(b"S#00000003\n");
        assert_eq!(err.kind, LoadErrKind::OddStart { addr: 3 });
        assert_eq!(err.to_string(), "line 1: ** odd start address in object file **");
        assert!(crate::err::report(&err).contains("not halfword aligned"));
    }
}
