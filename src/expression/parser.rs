//! Infix → postfix conversion.
//!
//! Grammar: numeric literals (`12`, `3.5`, `.5`), the binary operators
//! `+ - * / ^`, parentheses, and whitespace anywhere between tokens. There
//! are no unary operators. Precedence is `^` > `* /` > `+ -`; `^` is
//! right-associative, everything else left-associative.

use crate::error::{CalcError, Result};
use crate::expression::token::{Operator, Token};

#[derive(Debug, Clone, Copy, PartialEq)]
enum InfixToken {
    Number(f64),
    Op(Operator),
    LParen,
    RParen,
}

/// Parse an infix expression into a validated postfix sequence.
///
/// The postfix form is fully evaluated once before it is returned; the value
/// is discarded and only its validity matters (operator/operand arity,
/// division by zero, non-finite intermediates).
pub fn parse(infix: &str) -> Result<Vec<Token>> {
    let tokens = tokenize(infix)?;
    if tokens.is_empty() {
        return Err(CalcError::InvalidExpression("empty expression".to_string()));
    }
    let postfix = to_postfix(&tokens)?;
    evaluate_postfix(&postfix)?;
    Ok(postfix)
}

fn tokenize(infix: &str) -> Result<Vec<(usize, InfixToken)>> {
    let chars: Vec<char> = infix.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let value: f64 = literal.parse().map_err(|_| {
                CalcError::InvalidExpression(format!(
                    "invalid number '{}' at position {}",
                    literal, start
                ))
            })?;
            tokens.push((start, InfixToken::Number(value)));
            continue;
        }

        let token = match c {
            '(' => InfixToken::LParen,
            ')' => InfixToken::RParen,
            _ => match Operator::from_symbol(c) {
                Some(op) => InfixToken::Op(op),
                None => {
                    return Err(CalcError::InvalidExpression(format!(
                        "unknown token '{}' at position {}",
                        c, i
                    )))
                }
            },
        };
        tokens.push((i, token));
        i += 1;
    }

    Ok(tokens)
}

/// Shunting-yard. Also checks that operands and operators alternate, so
/// inputs like `3 4 +` or `3+*4` never reach evaluation.
fn to_postfix(tokens: &[(usize, InfixToken)]) -> Result<Vec<Token>> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<InfixToken> = Vec::new();
    let mut expect_operand = true;

    for &(pos, token) in tokens {
        match token {
            InfixToken::Number(value) => {
                if !expect_operand {
                    return Err(unexpected("number", pos));
                }
                output.push(Token::Operand(value));
                expect_operand = false;
            }
            InfixToken::LParen => {
                if !expect_operand {
                    return Err(unexpected("'('", pos));
                }
                stack.push(token);
            }
            InfixToken::RParen => {
                if expect_operand {
                    return Err(unexpected("')'", pos));
                }
                loop {
                    match stack.pop() {
                        Some(InfixToken::Op(op)) => output.push(Token::Operator(op)),
                        Some(InfixToken::LParen) => break,
                        _ => {
                            return Err(CalcError::InvalidExpression(format!(
                                "unmatched ')' at position {}",
                                pos
                            )))
                        }
                    }
                }
            }
            InfixToken::Op(op) => {
                if expect_operand {
                    return Err(unexpected(&format!("operator '{}'", op), pos));
                }
                while let Some(&InfixToken::Op(top)) = stack.last() {
                    let pops = top.precedence() > op.precedence()
                        || (top.precedence() == op.precedence() && !op.is_right_associative());
                    if !pops {
                        break;
                    }
                    output.push(Token::Operator(top));
                    stack.pop();
                }
                stack.push(token);
                expect_operand = true;
            }
        }
    }

    if expect_operand {
        return Err(CalcError::InvalidExpression(
            "expression ends with an operator".to_string(),
        ));
    }

    while let Some(token) = stack.pop() {
        match token {
            InfixToken::Op(op) => output.push(Token::Operator(op)),
            _ => {
                return Err(CalcError::InvalidExpression(
                    "unmatched '('".to_string(),
                ))
            }
        }
    }

    Ok(output)
}

fn unexpected(what: &str, pos: usize) -> CalcError {
    CalcError::InvalidExpression(format!("unexpected {} at position {}", what, pos))
}

/// Evaluate a postfix sequence locally, without any worker pool.
pub fn evaluate_postfix(postfix: &[Token]) -> Result<f64> {
    let mut stack: Vec<f64> = Vec::with_capacity(postfix.len());

    for token in postfix {
        match *token {
            Token::Operand(value) => stack.push(value),
            Token::Operator(op) => {
                let (second, first) = match (stack.pop(), stack.pop()) {
                    (Some(second), Some(first)) => (second, first),
                    _ => {
                        return Err(CalcError::InvalidExpression(format!(
                            "operator '{}' is missing an operand",
                            op
                        )))
                    }
                };
                if op == Operator::Div && second == 0.0 {
                    return Err(CalcError::InvalidExpression(
                        "division by zero".to_string(),
                    ));
                }
                let value = op.apply(first, second);
                if !value.is_finite() {
                    return Err(CalcError::InvalidExpression(format!(
                        "{} {} {} is not a finite number",
                        first, op, second
                    )));
                }
                stack.push(value);
            }
        }
    }

    match stack.as_slice() {
        [value] => Ok(*value),
        [] => Err(CalcError::InvalidExpression("empty expression".to_string())),
        values => Err(CalcError::InvalidExpression(format!(
            "{} operands left without an operator",
            values.len()
        ))),
    }
}

/// Deterministic id for an expression: whitespace is stripped and every
/// operator and parenthesis is replaced by a fixed, `_`-delimited code.
///
/// Injective over inputs accepted by [`parse`]: digits and `.` pass through
/// unchanged and no code is a prefix of another, so the original
/// (whitespace-free) text can always be recovered from the id.
pub fn fingerprint(infix: &str) -> String {
    let mut id = String::with_capacity(infix.len() * 2);
    for c in infix.chars().filter(|c| !c.is_whitespace()) {
        match c {
            '+' => id.push_str("_p_"),
            '-' => id.push_str("_min_"),
            '*' => id.push_str("_mul_"),
            '/' => id.push_str("_d_"),
            '^' => id.push_str("_pow_"),
            '(' => id.push_str("_o_"),
            ')' => id.push_str("_c_"),
            other => id.push(other),
        }
    }
    id
}
