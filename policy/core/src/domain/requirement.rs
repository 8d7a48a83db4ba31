// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Requirement Language
//!
//! Rules store a textual requirement expression. This module parses the
//! text into a [`Requirement`] tree, renders it back to canonical text and
//! matches it against the [`SigningFacts`] of a signature.
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "!" unary | "(" expr ")" | atom
//! atom    := "always" | "never" | "notarized"
//!          | "anchor" "apple" ["generic"]
//!          | "identifier" ["="] STRING
//!          | "cdhash" HASH
//!          | "info" "[" KEY "]" "=" STRING
//!          | "certificate" POS [ "[" FIELD "]" ] ( "=" STRING | "=" HASH | "exists" )
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::domain::signature::{Anchor, CertificateInfo, ContentHash, SigningFacts};

const MAX_DEPTH: usize = 64;
const MAX_TERMS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementError {
    #[error("empty requirement")]
    Empty,

    #[error("unexpected end of requirement")]
    UnexpectedEnd,

    #[error("unexpected '{token}' at offset {offset}")]
    UnexpectedToken { token: String, offset: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid hash literal '{0}'")]
    InvalidHash(String),

    #[error("unsupported certificate match: {0}")]
    UnsupportedMatch(String),

    #[error("requirement nests deeper than {MAX_DEPTH} levels or joins more than {MAX_TERMS} terms")]
    TooDeep,
}

/// Position of a certificate in a chain, leaf first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertPosition {
    Leaf,
    /// Last certificate of the chain. `anchor` is accepted as a synonym.
    Root,
    Index(usize),
}

impl CertPosition {
    fn select<'a>(&self, chain: &'a [CertificateInfo]) -> Option<&'a CertificateInfo> {
        match self {
            CertPosition::Leaf => chain.first(),
            CertPosition::Root => chain.last(),
            CertPosition::Index(i) => chain.get(*i),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertField {
    /// The certificate itself; only hash comparison and `exists` apply.
    Whole,
    SubjectCn,
    SubjectOu,
    /// Extension by OID; only `exists` applies.
    Extension(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertMatch {
    Equals(String),
    /// SHA-256 fingerprint, lowercase hex.
    Hash(String),
    Exists,
}

/// Parsed requirement expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Always,
    Never,
    Notarized,
    AnchorApple,
    AnchorAppleGeneric,
    Identifier(String),
    CdHash(ContentHash),
    Info {
        key: String,
        value: String,
    },
    Certificate {
        position: CertPosition,
        field: CertField,
        matcher: CertMatch,
    },
    And(Box<Requirement>, Box<Requirement>),
    Or(Box<Requirement>, Box<Requirement>),
    Not(Box<Requirement>),
}

impl Requirement {
    pub fn parse(text: &str) -> Result<Self, RequirementError> {
        let tokens = lex(text)?;
        if tokens.is_empty() {
            return Err(RequirementError::Empty);
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            terms: 0,
        };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(tok.unexpected()),
        }
    }

    pub fn and(self, other: Requirement) -> Requirement {
        Requirement::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Requirement) -> Requirement {
        Requirement::Or(Box::new(self), Box::new(other))
    }

    /// Evaluates the requirement against signing facts.
    pub fn matches(&self, facts: &SigningFacts<'_>) -> bool {
        match self {
            Requirement::Always => true,
            Requirement::Never => false,
            Requirement::Notarized => facts.notarized,
            Requirement::AnchorApple => facts.anchor == Anchor::Apple,
            Requirement::AnchorAppleGeneric => {
                matches!(facts.anchor, Anchor::Apple | Anchor::AppleGeneric)
            }
            Requirement::Identifier(id) => facts.identifier == Some(id.as_str()),
            Requirement::CdHash(hash) => facts.cdhash.is_some_and(|h| h.matches(hash)),
            Requirement::Info { key, value } => facts
                .info
                .and_then(|info| info.get(key))
                .is_some_and(|v| v == value),
            Requirement::Certificate {
                position,
                field,
                matcher,
            } => match position.select(facts.certificates) {
                Some(cert) => cert_matches(cert, field, matcher),
                None => false,
            },
            Requirement::And(l, r) => l.matches(facts) && r.matches(facts),
            Requirement::Or(l, r) => l.matches(facts) || r.matches(facts),
            Requirement::Not(inner) => !inner.matches(facts),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Requirement::Or(..) => 1,
            Requirement::And(..) => 2,
            _ => 3,
        }
    }
}

fn cert_matches(cert: &CertificateInfo, field: &CertField, matcher: &CertMatch) -> bool {
    match (field, matcher) {
        (CertField::Whole, CertMatch::Exists) => true,
        (CertField::Whole, CertMatch::Hash(h)) => cert.sha256.eq_ignore_ascii_case(h),
        (CertField::SubjectCn, CertMatch::Equals(v)) => &cert.subject_cn == v,
        (CertField::SubjectCn, CertMatch::Exists) => !cert.subject_cn.is_empty(),
        (CertField::SubjectOu, CertMatch::Equals(v)) => cert.subject_ou.as_deref() == Some(v),
        (CertField::SubjectOu, CertMatch::Exists) => cert.subject_ou.is_some(),
        (CertField::Extension(oid), CertMatch::Exists) => cert.has_extension(oid),
        _ => false,
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Requirement::parse(s)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{}", c)?;
    }
    f.write_str("\"")
}

impl fmt::Display for CertPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertPosition::Leaf => f.write_str("leaf"),
            CertPosition::Root => f.write_str("root"),
            CertPosition::Index(i) => write!(f, "{}", i),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Always => f.write_str("always"),
            Requirement::Never => f.write_str("never"),
            Requirement::Notarized => f.write_str("notarized"),
            Requirement::AnchorApple => f.write_str("anchor apple"),
            Requirement::AnchorAppleGeneric => f.write_str("anchor apple generic"),
            Requirement::Identifier(id) => {
                f.write_str("identifier ")?;
                write_quoted(f, id)
            }
            Requirement::CdHash(hash) => write!(f, "cdhash H\"{}\"", hash),
            Requirement::Info { key, value } => {
                write!(f, "info[{}] = ", key)?;
                write_quoted(f, value)
            }
            Requirement::Certificate {
                position,
                field,
                matcher,
            } => {
                write!(f, "certificate {}", position)?;
                match field {
                    CertField::Whole => {}
                    CertField::SubjectCn => f.write_str("[subject.CN]")?,
                    CertField::SubjectOu => f.write_str("[subject.OU]")?,
                    CertField::Extension(oid) => write!(f, "[field.{}]", oid)?,
                }
                match matcher {
                    CertMatch::Exists => f.write_str(" exists"),
                    CertMatch::Hash(h) => write!(f, " = H\"{}\"", h),
                    CertMatch::Equals(v) => {
                        f.write_str(" = ")?;
                        write_quoted(f, v)
                    }
                }
            }
            Requirement::And(l, r) => write_binary(f, self.precedence(), l, "and", r),
            Requirement::Or(l, r) => write_binary(f, self.precedence(), l, "or", r),
            Requirement::Not(inner) => {
                if inner.precedence() < 3 {
                    write!(f, "!({})", inner)
                } else {
                    write!(f, "!{}", inner)
                }
            }
        }
    }
}

fn write_binary(
    f: &mut fmt::Formatter<'_>,
    level: u8,
    left: &Requirement,
    op: &str,
    right: &Requirement,
) -> fmt::Result {
    if left.precedence() < level {
        write!(f, "({})", left)?;
    } else {
        write!(f, "{}", left)?;
    }
    write!(f, " {} ", op)?;
    // Operators are left-associative, so an equal-precedence right child
    // needs parentheses to keep its shape.
    if right.precedence() <= level {
        write!(f, "({})", right)
    } else {
        write!(f, "{}", right)
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Requirement::parse(&text).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Word(String),
    Str(String),
    Hash(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Bang,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn unexpected(&self) -> RequirementError {
        let token = match &self.kind {
            TokenKind::Word(w) => w.clone(),
            TokenKind::Str(s) => format!("\"{}\"", s),
            TokenKind::Hash(h) => format!("H\"{}\"", h),
            TokenKind::LParen => "(".into(),
            TokenKind::RParen => ")".into(),
            TokenKind::LBracket => "[".into(),
            TokenKind::RBracket => "]".into(),
            TokenKind::Eq => "=".into(),
            TokenKind::Bang => "!".into(),
        };
        RequirementError::UnexpectedToken {
            token,
            offset: self.offset,
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn lex(text: &str) -> Result<Vec<Token>, RequirementError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let single = match c {
            '(' => Some(TokenKind::LParen),
            ')' => Some(TokenKind::RParen),
            '[' => Some(TokenKind::LBracket),
            ']' => Some(TokenKind::RBracket),
            '=' => Some(TokenKind::Eq),
            '!' => Some(TokenKind::Bang),
            _ => None,
        };
        if let Some(kind) = single {
            tokens.push(Token { kind, offset });
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let hash_literal = c == 'H' && chars.get(i + 1).is_some_and(|(_, n)| *n == '"');
        if c == '"' || hash_literal {
            let start = if hash_literal { i + 1 } else { i };
            let (value, next) = read_string(&chars, start)?;
            let kind = if hash_literal {
                let valid = !value.is_empty() && value.chars().all(|h| h.is_ascii_hexdigit());
                if !valid {
                    return Err(RequirementError::InvalidHash(value));
                }
                TokenKind::Hash(value.to_ascii_lowercase())
            } else {
                TokenKind::Str(value)
            };
            tokens.push(Token { kind, offset });
            i = next;
            continue;
        }

        if is_word_char(c) {
            let mut word = String::new();
            while i < chars.len() && is_word_char(chars[i].1) {
                word.push(chars[i].1);
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Word(word),
                offset,
            });
            continue;
        }

        return Err(RequirementError::UnexpectedToken {
            token: c.to_string(),
            offset,
        });
    }
    Ok(tokens)
}

/// Reads a quoted string whose opening quote is at `start`.
fn read_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), RequirementError> {
    let opened_at = chars[start].0;
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            '"' => return Ok((value, i + 1)),
            '\\' => {
                let (_, escaped) = chars
                    .get(i + 1)
                    .ok_or(RequirementError::UnterminatedString(opened_at))?;
                value.push(*escaped);
                i += 2;
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
    Err(RequirementError::UnterminatedString(opened_at))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, RequirementError> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(RequirementError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Word(w), .. }) if w == word)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), RequirementError> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(())
        } else {
            Err(tok.unexpected())
        }
    }

    fn word(&mut self) -> Result<(String, Token), RequirementError> {
        let tok = self.next()?;
        match &tok.kind {
            TokenKind::Word(w) => Ok((w.clone(), tok)),
            _ => Err(tok.unexpected()),
        }
    }

    fn string(&mut self) -> Result<String, RequirementError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Str(s) => Ok(s),
            _ => Err(tok.unexpected()),
        }
    }

    fn enter(&mut self) -> Result<(), RequirementError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(RequirementError::TooDeep);
        }
        Ok(())
    }

    /// Counts one more `and`/`or` operand against the expression-wide budget.
    fn join(&mut self) -> Result<(), RequirementError> {
        self.terms += 1;
        if self.terms > MAX_TERMS {
            return Err(RequirementError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Requirement, RequirementError> {
        self.enter()?;
        let mut left = self.and()?;
        while self.peek_word("or") {
            self.pos += 1;
            self.join()?;
            let right = self.and()?;
            left = left.or(right);
        }
        self.depth -= 1;
        Ok(left)
    }

    fn and(&mut self) -> Result<Requirement, RequirementError> {
        let mut left = self.unary()?;
        while self.peek_word("and") {
            self.pos += 1;
            self.join()?;
            let right = self.unary()?;
            left = left.and(right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Requirement, RequirementError> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Bang) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.unary()?;
                self.depth -= 1;
                Ok(Requirement::Not(Box::new(inner)))
            }
            Some(TokenKind::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Requirement, RequirementError> {
        let (word, tok) = self.word()?;
        match word.as_str() {
            "always" => Ok(Requirement::Always),
            "never" => Ok(Requirement::Never),
            "notarized" => Ok(Requirement::Notarized),
            "anchor" => {
                let (what, what_tok) = self.word()?;
                if what != "apple" {
                    return Err(what_tok.unexpected());
                }
                if self.peek_word("generic") {
                    self.pos += 1;
                    Ok(Requirement::AnchorAppleGeneric)
                } else {
                    Ok(Requirement::AnchorApple)
                }
            }
            "identifier" => {
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Eq)) {
                    self.pos += 1;
                }
                Ok(Requirement::Identifier(self.string()?))
            }
            "cdhash" => {
                let tok = self.next()?;
                match &tok.kind {
                    TokenKind::Hash(h) => ContentHash::parse(h)
                        .map(Requirement::CdHash)
                        .map_err(|_| RequirementError::InvalidHash(h.clone())),
                    _ => Err(tok.unexpected()),
                }
            }
            "info" => {
                self.expect(TokenKind::LBracket)?;
                let (key, _) = self.word()?;
                self.expect(TokenKind::RBracket)?;
                self.expect(TokenKind::Eq)?;
                let value = self.string()?;
                Ok(Requirement::Info { key, value })
            }
            "certificate" | "cert" => self.certificate(),
            _ => Err(tok.unexpected()),
        }
    }

    fn certificate(&mut self) -> Result<Requirement, RequirementError> {
        let (pos_word, pos_tok) = self.word()?;
        let position = match pos_word.as_str() {
            "leaf" => CertPosition::Leaf,
            "root" | "anchor" => CertPosition::Root,
            n => n
                .parse::<usize>()
                .map(CertPosition::Index)
                .map_err(|_| pos_tok.unexpected())?,
        };

        let mut field = CertField::Whole;
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LBracket)) {
            self.pos += 1;
            let (name, name_tok) = self.word()?;
            field = match name.as_str() {
                "subject.CN" => CertField::SubjectCn,
                "subject.OU" => CertField::SubjectOu,
                other => match other.strip_prefix("field.") {
                    Some(oid) if !oid.is_empty() => CertField::Extension(oid.to_string()),
                    _ => return Err(name_tok.unexpected()),
                },
            };
            self.expect(TokenKind::RBracket)?;
        }

        let tok = self.next()?;
        let matcher = match tok.kind {
            TokenKind::Word(ref w) if w == "exists" => CertMatch::Exists,
            TokenKind::Eq => {
                let value = self.next()?;
                match value.kind {
                    TokenKind::Str(s) => CertMatch::Equals(s),
                    TokenKind::Hash(h) => CertMatch::Hash(h),
                    _ => return Err(value.unexpected()),
                }
            }
            _ => return Err(tok.unexpected()),
        };

        let supported = matches!(
            (&field, &matcher),
            (CertField::Whole, CertMatch::Exists | CertMatch::Hash(_))
                | (CertField::SubjectCn | CertField::SubjectOu, CertMatch::Equals(_) | CertMatch::Exists)
                | (CertField::Extension(_), CertMatch::Exists)
        );
        if !supported {
            return Err(RequirementError::UnsupportedMatch(format!(
                "{:?} with {:?}",
                field, matcher
            )));
        }

        Ok(Requirement::Certificate {
            position,
            field,
            matcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn cert(cn: &str, ou: Option<&str>, extensions: &[&str]) -> CertificateInfo {
        CertificateInfo {
            subject_cn: cn.to_string(),
            subject_ou: ou.map(str::to_string),
            sha256: "aa".repeat(32),
            not_after: Utc.with_ymd_and_hms(2035, 1, 1, 0, 0, 0).unwrap(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn test_canonical_text_round_trips() {
        let texts = [
            "anchor apple",
            "anchor apple generic and identifier \"com.example.app\" and certificate leaf[subject.OU] = \"TEAM123\"",
            "anchor apple generic and certificate 1[field.1.2.840.113635.100.6.2.6] exists and certificate leaf[field.1.2.840.113635.100.6.1.13] exists",
            "(always or never) and !notarized",
            "info[CFBundleVersion] = \"1.0\" or certificate root = H\"abcd\"",
            "identifier \"a \\\"quoted\\\" id\"",
        ];
        for text in texts {
            let parsed = Requirement::parse(text).unwrap();
            assert_eq!(parsed.to_string(), text);
            assert_eq!(Requirement::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn test_identifier_accepts_optional_equals() {
        assert_eq!(
            Requirement::parse("identifier = \"x\"").unwrap(),
            Requirement::Identifier("x".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Requirement::parse("   "), Err(RequirementError::Empty));
        assert!(matches!(
            Requirement::parse("anchor google"),
            Err(RequirementError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Requirement::parse("identifier \"open"),
            Err(RequirementError::UnterminatedString(_))
        ));
        assert!(matches!(
            Requirement::parse("cdhash H\"zz\""),
            Err(RequirementError::InvalidHash(_))
        ));
        assert!(matches!(
            Requirement::parse("certificate leaf[field.1.2] = \"x\""),
            Err(RequirementError::UnsupportedMatch(_))
        ));
        assert_eq!(Requirement::parse("always and"), Err(RequirementError::UnexpectedEnd));
        let deep = format!("{}always{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(Requirement::parse(&deep), Err(RequirementError::TooDeep));
    }

    #[test]
    fn test_long_flat_chains_are_rejected() {
        let within = vec!["always"; MAX_TERMS + 1].join(" and ");
        let parsed = Requirement::parse(&within).unwrap();
        assert_eq!(parsed.to_string(), within);

        let chain = vec!["always"; 200_000].join(" and ");
        assert_eq!(Requirement::parse(&chain), Err(RequirementError::TooDeep));

        let mixed = vec!["never or always"; 200].join(" and ");
        assert_eq!(Requirement::parse(&mixed), Err(RequirementError::TooDeep));
    }

    #[test]
    fn test_developer_id_requirement_matches_chain() {
        let req = Requirement::parse(
            "anchor apple generic and certificate 1[field.1.2.840.113635.100.6.2.6] exists \
             and certificate leaf[field.1.2.840.113635.100.6.1.13] exists",
        )
        .unwrap();
        let chain = vec![
            cert("Developer ID Application: Example", Some("TEAM"), &["1.2.840.113635.100.6.1.13"]),
            cert("Developer ID Certification Authority", None, &["1.2.840.113635.100.6.2.6"]),
            cert("Apple Root CA", None, &[]),
        ];
        let info = BTreeMap::new();
        let mut facts = SigningFacts {
            identifier: Some("com.example.app"),
            cdhash: None,
            anchor: Anchor::AppleGeneric,
            certificates: &chain,
            info: Some(&info),
            notarized: false,
        };
        assert!(req.matches(&facts));

        facts.anchor = Anchor::Other;
        assert!(!req.matches(&facts));
    }

    #[test]
    fn test_cdhash_matches_full_or_truncated_digest() {
        let full = ContentHash::parse(&"3f".repeat(32)).unwrap();
        let req = Requirement::CdHash(full.truncated());
        let facts = SigningFacts {
            identifier: None,
            cdhash: Some(&full),
            anchor: Anchor::None,
            certificates: &[],
            info: None,
            notarized: false,
        };
        assert!(req.matches(&facts));
        assert!(Requirement::parse(&format!("cdhash H\"{}\"", full))
            .unwrap()
            .matches(&facts));
    }

    #[test]
    fn test_anchor_apple_generic_includes_apple() {
        let facts = SigningFacts {
            identifier: Some("com.apple.ls"),
            cdhash: None,
            anchor: Anchor::Apple,
            certificates: &[],
            info: None,
            notarized: false,
        };
        assert!(Requirement::AnchorAppleGeneric.matches(&facts));
        assert!(Requirement::AnchorApple.matches(&facts));
        assert!(!Requirement::parse("!anchor apple").unwrap().matches(&facts));
    }
}
