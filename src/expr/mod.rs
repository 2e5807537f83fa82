//! Expression cleaning.
//!
//! Every adapter funnels the scalar expressions it finds in native explain
//! output (filters, join conditions, projected columns) through
//! [`clean_expression`]: engine-specific operator spellings are rewritten to
//! infix form, quoting and qualification noise is stripped, and redundant
//! parentheses are removed, so the same predicate prints identically no
//! matter which engine produced it.

pub mod token;

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ExpressionError;
use token::{tokenize, Token, TokenKind};

fn cast_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"::\w+").expect("static regex"))
}

fn qualification_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*\.").expect("static regex"))
}

/// Character-level normalisation applied before tokenizing.
fn pre_clean(expression: &str) -> String {
    // Attribute escaping back to the real comparison operators.
    let mut text = expression.replace("&lt;", "<").replace("&gt;", ">");
    // DuckDB decorates nullable columns in explain output.
    text = text.replace("optional:", "");
    // SQL Server quotes every identifier in brackets.
    text = text.replace(['[', ']'], "");
    // Remove casts before qualification stripping so `col::numeric` and
    // `schema.col` interact predictably.
    text = cast_regex().replace_all(&text, "").into_owned();
    // Strip one level of qualification repeatedly until stable.
    loop {
        let stripped = qualification_regex().replace_all(&text, "").into_owned();
        if stripped == text {
            break;
        }
        text = stripped;
    }
    text
}

/// Records the partner index on every parenthesis token.
fn match_parens(tokens: &mut [Token], expression: &str) -> Result<(), ExpressionError> {
    let mut stack: Vec<usize> = Vec::new();
    for i in 0..tokens.len() {
        match tokens[i].kind {
            TokenKind::LeftParen => stack.push(i),
            TokenKind::RightParen => {
                let open = stack.pop().ok_or_else(|| {
                    ExpressionError::UnmatchedParenthesis {
                        expression: expression.to_string(),
                    }
                })?;
                tokens[open].matching = i as isize;
                tokens[i].matching = open as isize;
            }
            _ => {}
        }
    }
    if !stack.is_empty() {
        return Err(ExpressionError::UnmatchedParenthesis {
            expression: expression.to_string(),
        });
    }
    Ok(())
}

/// Finds the matching close paren for the opener at `open` by depth scan.
fn closing_paren(tokens: &[Token], open: usize, expression: &str) -> Result<usize, ExpressionError> {
    let mut depth = 0isize;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        match tok.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    Err(ExpressionError::UnmatchedParenthesis {
        expression: expression.to_string(),
    })
}

/// Rewrites engine operator-functions like `equals(a,b)` into infix form.
///
/// Runs to a fixed point; each rewrite eliminates one operator-function
/// token and nested occurrences inside the arguments are picked up on later
/// iterations.
fn rewrite_operator_functions(
    mut tokens: Vec<Token>,
    expression: &str,
) -> Result<Vec<Token>, ExpressionError> {
    while let Some(idx) = tokens
        .iter()
        .position(|t| t.kind == TokenKind::OperatorFunction)
    {
        let open = idx + 1;
        if tokens.get(open).map(|t| t.kind) != Some(TokenKind::LeftParen) {
            // Tokenizer only emits the kind when a paren follows, so this
            // is a stream-corruption guard, not a reachable user error.
            return Err(ExpressionError::UnmatchedParenthesis {
                expression: expression.to_string(),
            });
        }
        let close = closing_paren(&tokens, open, expression)?;
        let operator = tokens[idx].value.clone();

        // Split the argument span on depth-1 commas.
        let mut args: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 0usize;
        for tok in &tokens[open + 1..close] {
            match tok.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth -= 1,
                TokenKind::Comma if depth == 0 => {
                    args.push(Vec::new());
                    continue;
                }
                _ => {}
            }
            args.last_mut().expect("non-empty args").push(tok.clone());
        }

        let mut replacement: Vec<Token> = Vec::new();
        match operator.as_str() {
            // `_CAST(x, 'T')` keeps only the value being cast.
            "CAST" => {
                replacement.extend(args.into_iter().next().unwrap_or_default());
            }
            "NOT" => {
                replacement.push(Token::new(TokenKind::LeftParen, "("));
                replacement.push(Token::new(TokenKind::Operator, "NOT"));
                replacement.extend(args.into_iter().next().unwrap_or_default());
                replacement.push(Token::new(TokenKind::RightParen, ")"));
            }
            _ => {
                replacement.push(Token::new(TokenKind::LeftParen, "("));
                for (n, arg) in args.into_iter().enumerate() {
                    if n > 0 {
                        replacement.push(Token::new(TokenKind::Operator, operator.clone()));
                    }
                    replacement.extend(arg);
                }
                replacement.push(Token::new(TokenKind::RightParen, ")"));
            }
        }
        tokens.splice(idx..=close, replacement);
    }
    Ok(tokens)
}

fn kill(tokens: &mut [Token], index: usize) {
    let partner = tokens[index].matching;
    if partner >= 0 {
        tokens[partner as usize].matching = -1;
    }
    tokens[index].matching = -1;
}

fn previous_alive(tokens: &[Token], index: usize) -> Option<usize> {
    (0..index).rev().find(|i| tokens[*i].matching >= 0)
}

/// Binding strength of an operator; higher binds tighter.
fn precedence(op: &str) -> u8 {
    match op {
        "OR" => 1,
        "AND" => 2,
        "NOT" => 3,
        "+" | "-" | "||" => 5,
        "*" | "/" | "%" => 6,
        "^" | "~" | "!" => 7,
        "::" => 8,
        // Comparisons, LIKE family, and anything unrecognised.
        _ => 4,
    }
}

/// Kills parentheses that change nothing.
///
/// Covers the lonely literal, the doubled pair with coinciding extents, and
/// the pair wrapping the whole expression, plus any pair whose direct
/// contents bind tighter than the operators around it. Call parentheses
/// (opener preceded by a function token) and argument tuples (direct comma
/// inside) are never touched. Runs to a fixed point so killing an outer pair
/// exposes the next one.
fn remove_redundant_parens(tokens: &mut Vec<Token>) {
    loop {
        let mut changed = false;
        for i in 0..tokens.len() {
            if tokens[i].kind != TokenKind::LeftParen || tokens[i].matching < 0 {
                continue;
            }
            let close = tokens[i].matching as usize;

            if previous_alive(tokens, i)
                .map(|p| tokens[p].kind == TokenKind::Function)
                .unwrap_or(false)
            {
                continue;
            }

            // Direct contents: alive tokens between the pair, skipping
            // anything nested one paren deeper.
            let mut depth = 0usize;
            let mut has_comma = false;
            let mut inner_min: Option<u8> = None;
            for tok in tokens[i + 1..close].iter().filter(|t| t.matching >= 0) {
                match tok.kind {
                    TokenKind::LeftParen => depth += 1,
                    TokenKind::RightParen => depth -= 1,
                    TokenKind::Comma if depth == 0 => has_comma = true,
                    TokenKind::Operator if depth == 0 => {
                        let p = precedence(&tok.value);
                        inner_min = Some(inner_min.map_or(p, |m| m.min(p)));
                    }
                    _ => {}
                }
            }
            if has_comma {
                continue;
            }

            let left_context = previous_alive(tokens, i)
                .filter(|p| tokens[*p].kind == TokenKind::Operator)
                .map(|p| precedence(&tokens[p].value))
                .unwrap_or(0);
            let right_context = tokens[close + 1..]
                .iter()
                .find(|t| t.matching >= 0)
                .filter(|t| t.kind == TokenKind::Operator)
                .map(|t| precedence(&t.value))
                .unwrap_or(0);

            // A pair with no direct operators groups nothing at all.
            let binds_tighter = match inner_min {
                None => true,
                Some(m) => m > left_context.max(right_context),
            };
            if binds_tighter {
                kill(tokens, i);
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }
    tokens.retain(|t| t.matching >= 0);
}

fn is_wordy(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Literal | TokenKind::LiteralString | TokenKind::Function
    )
}

/// Renders a token stream back into expression text.
fn render(tokens: &[Token]) -> String {
    let mut result = String::new();
    let mut previous: Option<TokenKind> = None;
    for (i, tok) in tokens.iter().enumerate() {
        if tok.kind == TokenKind::Ignore {
            continue;
        }
        // Adjacent word-like tokens must not fuse into one.
        if previous.map(is_wordy).unwrap_or(false) && is_wordy(tok.kind) {
            result.push(' ');
        }
        previous = Some(tok.kind);
        match tok.kind {
            TokenKind::Operator => {
                if tok.value == "::" {
                    result.push_str("::");
                } else {
                    if !result.is_empty() && !result.ends_with(' ') {
                        result.push(' ');
                    }
                    result.push_str(&tok.value);
                    result.push(' ');
                }
            }
            TokenKind::Comma => result.push_str(", "),
            TokenKind::LiteralString => {
                if is_array_literal(tokens, i) {
                    let inner = tok.value.trim_matches(|c| c == '{' || c == '}');
                    let quoted: Vec<String> =
                        inner.split(',').map(|v| format!("'{}'", v.trim())).collect();
                    result.push_str(&quoted.join(", "));
                } else {
                    result.push('\'');
                    result.push_str(&tok.value);
                    result.push('\'');
                }
            }
            _ => result.push_str(&tok.value),
        }
    }
    result.trim().to_string()
}

/// True when a brace-array string literal sits directly inside the call
/// parens of an `IN`-translated function and should explode into a list.
fn is_array_literal(tokens: &[Token], index: usize) -> bool {
    if !tokens[index].value.starts_with('{') || !tokens[index].value.ends_with('}') {
        return false;
    }
    let mut prior = tokens[..index].iter().rev().filter(|t| t.kind != TokenKind::Ignore);
    matches!(prior.next(), Some(t) if t.kind == TokenKind::LeftParen)
        && matches!(prior.next(), Some(t) if t.kind == TokenKind::Function && t.value == "IN")
}

/// Normalises a scalar expression from native explain output.
///
/// The result is stable: cleaning a cleaned expression is a no-op.
pub fn clean_expression(expression: &str) -> Result<String, ExpressionError> {
    if expression.trim().is_empty() {
        return Ok(String::new());
    }
    let prepared = pre_clean(expression);
    let tokens = tokenize(&prepared)?;
    let mut tokens = rewrite_operator_functions(tokens, &prepared)?;
    match_parens(&mut tokens, &prepared)?;
    remove_redundant_parens(&mut tokens);
    Ok(render(&tokens))
}

/// Removes a function call (and the boolean operator attaching it) from an
/// expression.
///
/// Used to strip the artificial `EXISTS(...)` wrapper when a
/// left-join-plus-filter pattern collapses into a semi-join. If the function
/// does not occur the expression is simply cleaned.
pub fn remove_expression_function(
    expression: &str,
    name: &str,
) -> Result<String, ExpressionError> {
    let prepared = pre_clean(expression);
    let tokens = tokenize(&prepared)?;
    let mut tokens = rewrite_operator_functions(tokens, &prepared)?;
    match_parens(&mut tokens, &prepared)?;

    if let Some(idx) = tokens
        .iter()
        .position(|t| t.kind == TokenKind::Function && t.value.eq_ignore_ascii_case(name))
    {
        let open = idx + 1;
        if tokens.get(open).map(|t| t.kind) == Some(TokenKind::LeftParen) {
            let close = tokens[open].matching as usize;
            for tok in &mut tokens[idx..=close] {
                tok.kind = TokenKind::Ignore;
                tok.matching = 0;
            }
        } else {
            tokens[idx].kind = TokenKind::Ignore;
        }

        // Eat the `NOT` chain and the boolean operator that attached the
        // call; when the call led the expression, eat the trailing one.
        let mut cursor = idx;
        let mut ate_leading_operator = false;
        while let Some(p) = previous_live_index(&tokens, cursor) {
            if tokens[p].kind == TokenKind::Operator && tokens[p].value == "NOT" {
                tokens[p].kind = TokenKind::Ignore;
                cursor = p;
                continue;
            }
            if tokens[p].kind == TokenKind::Operator
                && matches!(tokens[p].value.as_str(), "AND" | "OR")
            {
                tokens[p].kind = TokenKind::Ignore;
                ate_leading_operator = true;
            }
            break;
        }
        if !ate_leading_operator {
            if let Some(n) = tokens
                .iter()
                .position(|t| t.kind == TokenKind::Operator && matches!(t.value.as_str(), "AND" | "OR"))
            {
                let before_is_live = tokens[..n].iter().any(|t| t.kind != TokenKind::Ignore);
                if !before_is_live {
                    tokens[n].kind = TokenKind::Ignore;
                }
            }
        }
    }

    let mut tokens: Vec<Token> = tokens
        .into_iter()
        .filter(|t| t.kind != TokenKind::Ignore)
        .collect();
    for tok in &mut tokens {
        tok.matching = 0;
    }
    match_parens(&mut tokens, &prepared)?;
    remove_redundant_parens(&mut tokens);
    Ok(render(&tokens))
}

fn previous_live_index(tokens: &[Token], index: usize) -> Option<usize> {
    (0..index).rev().find(|i| tokens[*i].kind != TokenKind::Ignore)
}
