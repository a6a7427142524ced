//! `nom` parser for the expression language.
//!
//! Precedence, loosest first: `||`, `&&`, comparisons (non-associative),
//! `+ -`, `* / %`, unary `! -`, member access, primaries.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use modeljoin_model::Value;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1};
use nom::character::complete::{char as pchar, digit1, multispace0};
use nom::combinator::{all_consuming, map, map_res, opt, recognize, value};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot parse expression '{text}' at offset {offset}")]
pub struct ParseError {
    pub text: String,
    pub offset: usize,
}

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    match all_consuming(ws(expression))(input) {
        Ok((_, expr)) => Ok(expr),
        Err(err) => {
            let offset = match err {
                nom::Err::Error(e) | nom::Err::Failure(e) => input.len() - e.input.len(),
                nom::Err::Incomplete(_) => input.len(),
            };
            Err(ParseError {
                text: input.to_string(),
                offset,
            })
        }
    }
}

fn expression(input: &str) -> IResult<&str, Expr> {
    or_expr(input)
}

// ============================================================================
// Binary levels
// ============================================================================

fn or_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(pair(ws(value(BinaryOp::Or, tag("||"))), and_expr))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn and_expr(input: &str) -> IResult<&str, Expr> {
    let (input, first) = comparison(input)?;
    let (input, rest) = many0(pair(ws(value(BinaryOp::And, tag("&&"))), comparison))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn comparison(input: &str) -> IResult<&str, Expr> {
    let (input, left) = additive(input)?;
    let (input, right) = opt(pair(ws(comparison_op), additive))(input)?;
    Ok((input, fold_binary(left, right.into_iter().collect())))
}

fn comparison_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    ))(input)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Add, pchar('+')),
            value(BinaryOp::Sub, pchar('-')),
        ))),
        multiplicative,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(pair(
        ws(alt((
            value(BinaryOp::Mul, pchar('*')),
            value(BinaryOp::Div, pchar('/')),
            value(BinaryOp::Rem, pchar('%')),
        ))),
        unary,
    ))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn fold_binary(first: Expr, rest: Vec<(BinaryOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |left, (op, right)| Expr::binary(op, left, right))
}

// ============================================================================
// Unary, member access, primaries
// ============================================================================

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(pchar('!')), unary), |e| Expr::unary(UnaryOp::Not, e)),
        map(preceded(ws(pchar('-')), unary), |e| Expr::unary(UnaryOp::Neg, e)),
        member_access,
    ))(input)
}

fn member_access(input: &str) -> IResult<&str, Expr> {
    let (input, target) = primary(input)?;
    let (input, features) = many0(preceded(ws(pchar('.')), identifier))(input)?;
    Ok((
        input,
        features
            .into_iter()
            .fold(target, |target, feature| Expr::member(target, feature)),
    ))
}

fn primary(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        map(number, Expr::Literal),
        map(string_lit, |s| Expr::Literal(Value::String(s))),
        name_or_call,
        delimited(pchar('('), expression, ws(pchar(')'))),
    )))(input)
}

fn name_or_call(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(delimited(
        ws(pchar('(')),
        separated_list0(ws(pchar(',')), expression),
        ws(pchar(')')),
    ))(input)?;
    if let Some(args) = args {
        return Ok((input, Expr::Call(name, args)));
    }
    let expr = match keyword(&name) {
        Some(literal) => Expr::Literal(literal),
        None => Expr::Var(name),
    };
    Ok((input, expr))
}

fn keyword(name: &str) -> Option<Value> {
    match name {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

/// Integers become `int`, or `long` when they do not fit; decimals `double`.
fn number(input: &str) -> IResult<&str, Value> {
    map_res(
        recognize(pair(digit1, opt(pair(pchar('.'), digit1)))),
        |text: &str| -> Result<Value, String> {
            if text.contains('.') {
                return text
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|e| e.to_string());
            }
            let wide = text.parse::<i64>().map_err(|e| e.to_string())?;
            Ok(i32::try_from(wide).map_or(Value::Long(wide), Value::Int))
        },
    )(input)
}

fn string_lit(input: &str) -> IResult<&str, String> {
    alt((
        map(tag("\"\""), |_| String::new()),
        delimited(
            pchar('"'),
            escaped_transform(is_not("\\\""), '\\', escape),
            pchar('"'),
        ),
        map(tag("''"), |_| String::new()),
        delimited(
            pchar('\''),
            escaped_transform(is_not("\\'"), '\\', escape),
            pchar('\''),
        ),
    ))(input)
}

fn escape(input: &str) -> IResult<&str, &str> {
    alt((
        value("\\", tag("\\")),
        value("\"", tag("\"")),
        value("'", tag("'")),
        value("\n", tag("n")),
        value("\t", tag("t")),
    ))(input)
}

fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(tuple((
            take_while1(is_ident_start),
            take_while(is_ident_continue),
        ))),
        |s: &str| s.to_string(),
    )(input)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}
