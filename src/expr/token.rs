//! Tokenizer for scalar expressions appearing inside plan nodes.
//!
//! This is not a SQL lexer: it only understands the filter, join-condition,
//! and projection fragments engines print in their explain output.

use crate::error::ExpressionError;

/// Classification of a single expression token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Column references, numbers, and other bare words.
    Literal,
    /// Infix or prefix operators, spaced when rendered.
    Operator,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `,`
    Comma,
    /// Single-quoted string contents.
    LiteralString,
    /// Recognised aggregate/predicate function name.
    Function,
    /// Engine-specific function spelling of an operator, e.g. `equals(a,b)`.
    OperatorFunction,
    /// Absent token; never produced by the tokenizer itself.
    None,
    /// Marked for removal; skipped by the renderer.
    Ignore,
}

/// A parsed expression token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// What the token is.
    pub kind: TokenKind,
    /// Normalised text of the token.
    pub value: String,
    /// Index of the partner parenthesis, or -1 once the token is dead.
    pub matching: isize,
}

impl Token {
    pub(crate) fn new(kind: TokenKind, value: impl Into<String>) -> Self {
        Token {
            kind,
            value: value.into(),
            matching: 0,
        }
    }
}

/// Recognised aggregate/predicate functions and their canonical spellings.
///
/// The canonical names are included as keys so cleaned output re-tokenizes
/// to the same stream it was rendered from.
const FUNCTIONS: &[(&str, &str)] = &[
    ("SUM", "SUM"),
    ("MAX", "MAX"),
    ("MIN", "MIN"),
    ("AVG", "AVG"),
    ("COUNT", "COUNT"),
    ("COUNT_BIG", "COUNT"),
    ("BLOOM", "BLOOM"),
    ("ANY", "IN"),
    ("IN", "IN"),
    ("EXISTS", "EXISTS"),
    ("LEFT", "LEFT"),
    ("RIGHT", "RIGHT"),
    ("SUBSTRING", "SUBSTRING"),
];

/// Words engines quote that are really functions.
const QUOTED_FUNCTIONS: &[(&str, &str)] = &[
    ("\"left\"", "LEFT"),
    ("\"right\"", "RIGHT"),
    ("\"substring\"", "SUBSTRING"),
];

/// Engine function spellings of plain operators, keyed lowercase.
///
/// The special value `CAST` keeps only its first argument when rewritten.
const OPERATOR_FUNCTIONS: &[(&str, &str)] = &[
    ("equals", "="),
    ("notequals", "<>"),
    ("less", "<"),
    ("lessorequals", "<="),
    ("greater", ">"),
    ("greaterorequals", ">="),
    ("funcand", "AND"),
    ("funcor", "OR"),
    ("funcplus", "+"),
    ("funcminus", "-"),
    ("funcmultiply", "*"),
    ("funcdivide", "/"),
    ("and", "AND"),
    ("or", "OR"),
    ("not", "NOT"),
    ("_cast", "CAST"),
];

fn operator_function(word: &str) -> Option<&'static str> {
    let lower = word.to_ascii_lowercase();
    OPERATOR_FUNCTIONS
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, op)| *op)
}

fn function_name(word: &str) -> Option<&'static str> {
    let upper = word.to_ascii_uppercase();
    FUNCTIONS
        .iter()
        .find(|(name, _)| *name == upper)
        .map(|(_, canonical)| *canonical)
}

fn is_literal_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '"' | '{' | '}' | '$')
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '"' | '{' | '}' | '$')
}

/// Splits an expression into tokens.
///
/// Fails on an unterminated string or any character outside the
/// literal/operator alphabets; callers treat that as a hard explain-parsing
/// failure.
pub fn tokenize(expr: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // String literal; the quotes are dropped from the value.
        if c == '\'' {
            let mut literal = String::new();
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                literal.push(chars[i]);
                i += 1;
            }
            if i >= chars.len() {
                return Err(ExpressionError::UnmatchedParenthesis {
                    expression: expr.to_string(),
                });
            }
            i += 1;
            tokens.push(Token::new(TokenKind::LiteralString, literal));
            continue;
        }

        if c == '(' {
            tokens.push(Token::new(TokenKind::LeftParen, "("));
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::new(TokenKind::RightParen, ")"));
            i += 1;
            continue;
        }
        if c == ',' {
            tokens.push(Token::new(TokenKind::Comma, ","));
            i += 1;
            continue;
        }

        // `*` directly after `(` is COUNT(*)-style, a literal not an operator.
        if c == '*' && matches!(tokens.last(), Some(t) if t.kind == TokenKind::LeftParen) {
            tokens.push(Token::new(TokenKind::Literal, "*"));
            i += 1;
            continue;
        }

        // Multi-character operators; `!~~` must win over `!=`.
        let rest: String = chars[i..].iter().take(3).collect();
        if rest.starts_with("!~~") {
            tokens.push(Token::new(TokenKind::Operator, "NOT LIKE"));
            i += 3;
            continue;
        }
        if rest.starts_with("~~") {
            tokens.push(Token::new(TokenKind::Operator, "LIKE"));
            i += 2;
            continue;
        }
        if rest.starts_with("::") {
            tokens.push(Token::new(TokenKind::Operator, "::"));
            i += 2;
            continue;
        }
        let mut matched_two = false;
        for two in ["<>", "!=", ">=", "<=", "||"] {
            if rest.starts_with(two) {
                tokens.push(Token::new(TokenKind::Operator, two));
                i += 2;
                matched_two = true;
                break;
            }
        }
        if matched_two {
            continue;
        }

        if "~!+-*/=<>%^".contains(c) {
            tokens.push(Token::new(TokenKind::Operator, c.to_string()));
            i += 1;
            continue;
        }

        if !is_word_start(c) {
            return Err(ExpressionError::InvalidCharacter {
                found: c,
                expression: expr.to_string(),
            });
        }

        let mut word = String::new();
        while i < chars.len() && is_literal_char(chars[i]) {
            word.push(chars[i]);
            i += 1;
        }

        // Peek for a call; engine operator-functions only count when a
        // parenthesis follows, so bare AND/OR keep their operator meaning.
        let mut peek = i;
        while peek < chars.len() && chars[peek].is_whitespace() {
            peek += 1;
        }
        let followed_by_paren = peek < chars.len() && chars[peek] == '(';

        if followed_by_paren {
            if let Some(op) = operator_function(&word) {
                tokens.push(Token::new(TokenKind::OperatorFunction, op));
                continue;
            }
        }
        if let Some(canonical) = function_name(&word) {
            tokens.push(Token::new(TokenKind::Function, canonical));
            continue;
        }
        if let Some((_, canonical)) = QUOTED_FUNCTIONS
            .iter()
            .find(|(quoted, _)| *quoted == word.to_ascii_lowercase())
        {
            tokens.push(Token::new(TokenKind::Function, *canonical));
            continue;
        }

        let upper = word.to_ascii_uppercase();
        if matches!(upper.as_str(), "AND" | "OR" | "NOT" | "LIKE" | "ILIKE") {
            tokens.push(Token::new(TokenKind::Operator, upper));
            continue;
        }

        tokens.push(Token::new(TokenKind::Literal, word));
    }

    Ok(tokens)
}
