//! Security expression parser
//!
//! ```text
//! expression := and (("or" | "||") and)*
//! and        := comparison (("and" | "&&") comparison)*
//! comparison := unary (op unary)?
//! op         := "===" | "!==" | "==" | "!=" | "<=" | ">=" | "<" | ">"
//!             | "not in" | "in" | "matches"
//! unary      := ("not" | "!") unary | "-" unary | postfix
//! postfix    := primary ("." identifier args?)*
//! primary    := string | number | "true" | "false" | "null" | list
//!             | "(" expression ")" | identifier args?
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag, take},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, multispace1, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{context, convert_error, ContextError, ErrorKind, ParseError as NomParseError, VerboseError},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::{Number, Value};

use super::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::ExpressionError;

const RESERVED: &[&str] = &["and", "or", "not", "in", "matches", "true", "false", "null"];

/// Parse a complete security expression.
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    match all_consuming(delimited(
        multispace0::<_, VerboseError<&str>>,
        expression,
        multispace0,
    ))(input)
    {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(ExpressionError::Parse {
            expression: input.to_string(),
            message: convert_error(input, e),
        }),
        Err(nom::Err::Incomplete(_)) => Err(ExpressionError::Parse {
            expression: input.to_string(),
            message: "incomplete input".to_string(),
        }),
    }
}

// ============================================================================
// Operators
// ============================================================================

fn expression<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(ws(alt((keyword("or"), tag("||")))), and_expr))(input)?;
    Ok((input, fold(BinaryOp::Or, first, rest)))
}

fn and_expr<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, first) = comparison(input)?;
    let (input, rest) =
        many0(preceded(ws(alt((keyword("and"), tag("&&")))), comparison))(input)?;
    Ok((input, fold(BinaryOp::And, first, rest)))
}

fn fold(op: BinaryOp, first: Expr, rest: Vec<Expr>) -> Expr {
    rest.into_iter()
        .fold(first, |left, right| Expr::binary(op, left, right))
}

fn comparison<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, left) = unary(input)?;
    let (input, tail) = opt(pair(ws(comparison_op), cut(unary)))(input)?;
    Ok((
        input,
        match tail {
            Some((op, right)) => Expr::binary(op, left, right),
            None => left,
        },
    ))
}

fn comparison_op<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, BinaryOp, E> {
    alt((
        value(BinaryOp::Identical, tag("===")),
        value(BinaryOp::NotIdentical, tag("!==")),
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::NotEq, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
        value(
            BinaryOp::NotIn,
            tuple((keyword("not"), multispace1, keyword("in"))),
        ),
        value(BinaryOp::In, keyword("in")),
        value(BinaryOp::Matches, keyword("matches")),
    ))(input)
}

fn unary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    alt((
        map(
            preceded(ws(alt((keyword("not"), tag("!")))), unary),
            |operand| Expr::unary(UnaryOp::Not, operand),
        ),
        map(preceded(ws(char('-')), unary), |operand| {
            Expr::unary(UnaryOp::Neg, operand)
        }),
        postfix,
    ))(input)
}

// ============================================================================
// Member access and calls
// ============================================================================

fn postfix<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (mut input, mut expr) = primary(input)?;

    loop {
        let member: IResult<&'a str, &'a str, E> = preceded(
            pair(multispace0, char('.')),
            preceded(multispace0, identifier),
        )(input);
        let Ok((rest, name)) = member else {
            break;
        };

        let (rest, args) = opt(call_args)(rest)?;
        expr = match args {
            Some(args) => Expr::MethodCall {
                target: Box::new(expr),
                method: name.to_string(),
                args,
            },
            None => Expr::Member {
                target: Box::new(expr),
                name: name.to_string(),
            },
        };
        input = rest;
    }

    Ok((input, expr))
}

fn call_args<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Vec<Expr>, E> {
    delimited(
        pair(multispace0, char('(')),
        separated_list0(ws(char(',')), ws(expression)),
        cut(pair(multispace0, context("closing parenthesis", char(')')))),
    )(input)
}

// ============================================================================
// Primaries
// ============================================================================

fn primary<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    alt((
        map(string_literal, |s| Expr::Literal(Value::String(s))),
        number_literal,
        value(Expr::Literal(Value::Bool(true)), keyword("true")),
        value(Expr::Literal(Value::Bool(false)), keyword("false")),
        value(Expr::Literal(Value::Null), keyword("null")),
        list_literal,
        delimited(
            pair(char('('), multispace0),
            expression,
            cut(pair(multispace0, context("closing parenthesis", char(')')))),
        ),
        function_or_variable,
    ))(input)
}

fn function_or_variable<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    let (input, name) = identifier(input)?;
    let (input, args) = opt(call_args)(input)?;
    let name = name.to_string();
    Ok((
        input,
        match args {
            Some(args) => Expr::Call {
                function: name,
                args,
            },
            None => Expr::Variable(name),
        },
    ))
}

fn list_literal<'a, E: NomParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, Expr, E> {
    map(
        delimited(
            pair(char('['), multispace0),
            terminated(
                separated_list0(ws(char(',')), ws(expression)),
                opt(ws(char(','))),
            ),
            cut(pair(multispace0, context("closing bracket", char(']')))),
        ),
        Expr::List,
    )(input)
}

/// Single- or double-quoted string. Unknown escapes yield the escaped char.
fn string_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    alt((
        delimited(
            char('\''),
            map(
                opt(escaped_transform(is_not("'\\"), '\\', escape)),
                Option::unwrap_or_default,
            ),
            char('\''),
        ),
        delimited(
            char('"'),
            map(
                opt(escaped_transform(is_not("\"\\"), '\\', escape)),
                Option::unwrap_or_default,
            ),
            char('"'),
        ),
    ))(input)
}

fn escape<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    alt((
        value("\n", char('n')),
        value("\r", char('r')),
        value("\t", char('t')),
        take(1usize),
    ))(input)
}

fn number_literal<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, Expr, E> {
    let (rest, digits) = recognize(pair(digit1, opt(pair(char('.'), digit1))))(input)?;

    let number = if digits.contains('.') {
        digits.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        digits.parse::<i64>().ok().map(Number::from)
    };

    match number {
        Some(n) => Ok((rest, Expr::Literal(Value::Number(n)))),
        None => Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Digit))),
    }
}

// ============================================================================
// Tokens
// ============================================================================

fn identifier<'a, E: NomParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    verify(
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0(alt((alphanumeric1, tag("_")))),
        )),
        |name: &str| !RESERVED.contains(&name),
    )(input)
}

/// `word` not followed by an identifier character.
fn keyword<'a, E: NomParseError<&'a str>>(
    word: &'static str,
) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str, E> {
    terminated(
        tag(word),
        not(satisfy(|c: char| c.is_alphanumeric() || c == '_')),
    )
}

fn ws<'a, O, E: NomParseError<&'a str>, F>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}
