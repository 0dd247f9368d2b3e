//! Restricted, side-effect-free expression language for calculator, filter
//! and conditional nodes.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := cmp ( "&&" cmp )*
//! cmp     := sum ( ("==" | "!=" | "<=" | ">=" | "<" | ">") sum )?
//! sum     := product ( ("+" | "-") product )*
//! product := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("!" | "-") unary | postfix
//! postfix := primary ( ".length" )*
//! primary := number | 'text' | "text" | true | false | null | variable | "(" or ")"
//! ```
//!
//! Only the variables in [`VARIABLES`] may be referenced. There are no
//! calls, assignments, member lookups beyond `.length`, or loops.

use std::collections::HashMap;
use std::fmt;

use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, opt};
use winnow::error::{ContextError, ErrMode};
use winnow::token::{any, take_while};
use winnow::{ModalResult, Parser};

use weft_types::{Result, WeftError};

pub const MAX_EXPRESSION_LEN: usize = 512;

/// Names an expression may reference.
pub const VARIABLES: &[&str] = &["value", "input", "a", "b"];

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Operand),
    Var(String),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Length(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
}

// ---------------------------------------------------------------------------
// Runtime values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<Operand>),
}

impl Operand {
    /// Objects have no operand form; they are bound as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Operand::Null,
            serde_json::Value::Bool(b) => Operand::Bool(*b),
            serde_json::Value::Number(n) => Operand::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Operand::Text(s.clone()),
            serde_json::Value::Array(items) => {
                Operand::List(items.iter().map(Operand::from_json).collect())
            }
            obj @ serde_json::Value::Object(_) => Operand::Text(obj.to_string()),
        }
    }

    /// Integral numbers become JSON integers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Operand::Null => serde_json::Value::Null,
            Operand::Bool(b) => serde_json::Value::Bool(*b),
            Operand::Number(n) => number_to_json(*n),
            Operand::Text(s) => serde_json::Value::String(s.clone()),
            Operand::List(items) => {
                serde_json::Value::Array(items.iter().map(Operand::to_json).collect())
            }
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Operand::Null => false,
            Operand::Bool(b) => *b,
            Operand::Number(n) => *n != 0.0 && !n.is_nan(),
            Operand::Text(s) => !s.is_empty(),
            Operand::List(items) => !items.is_empty(),
        }
    }

    /// Numeric view. Text counts when it parses as a number.
    fn as_number(&self) -> Option<f64> {
        match self {
            Operand::Null => Some(0.0),
            Operand::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Operand::Number(n) => Some(*n),
            Operand::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    trimmed.parse().ok()
                }
            }
            Operand::List(_) => None,
        }
    }

    fn is_non_numeric(&self) -> bool {
        self.as_number().is_none()
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_SAFE {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Text(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Variable values for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    vars: HashMap<String, Operand>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: &serde_json::Value) -> Self {
        self.vars.insert(name.to_string(), Operand::from_json(value));
        self
    }

    fn get(&self, name: &str) -> Operand {
        self.vars.get(name).cloned().unwrap_or(Operand::Null)
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn or_op<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    "||".parse_next(input)
}

fn and_op<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    "&&".parse_next(input)
}

fn comparison_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        alt(("===", "==")).value(BinaryOp::Eq),
        alt(("!==", "!=")).value(BinaryOp::Ne),
        "<=".value(BinaryOp::Le),
        ">=".value(BinaryOp::Ge),
        "<".value(BinaryOp::Lt),
        ">".value(BinaryOp::Gt),
    ))
    .parse_next(input)
}

fn additive_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))).parse_next(input)
}

fn multiplicative_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        '*'.value(BinaryOp::Mul),
        '/'.value(BinaryOp::Div),
        '%'.value(BinaryOp::Rem),
    ))
    .parse_next(input)
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = and_expr.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        if opt(or_op).parse_next(input)?.is_none() {
            return Ok(lhs);
        }
        let rhs = and_expr.parse_next(input)?;
        lhs = binary(BinaryOp::Or, lhs, rhs);
    }
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = comparison.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        if opt(and_op).parse_next(input)?.is_none() {
            return Ok(lhs);
        }
        let rhs = comparison.parse_next(input)?;
        lhs = binary(BinaryOp::And, lhs, rhs);
    }
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = additive.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    match opt(comparison_op).parse_next(input)? {
        Some(op) => {
            let rhs = additive.parse_next(input)?;
            Ok(binary(op, lhs, rhs))
        }
        None => Ok(lhs),
    }
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = multiplicative.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        let Some(op) = opt(additive_op).parse_next(input)? else {
            return Ok(lhs);
        };
        let rhs = multiplicative.parse_next(input)?;
        lhs = binary(op, lhs, rhs);
    }
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = unary.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        let Some(op) = opt(multiplicative_op).parse_next(input)? else {
            return Ok(lhs);
        };
        let rhs = unary.parse_next(input)?;
        lhs = binary(op, lhs, rhs);
    }
}

fn bang(input: &mut &str) -> ModalResult<char> {
    '!'.parse_next(input)
}

fn minus(input: &mut &str) -> ModalResult<char> {
    '-'.parse_next(input)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    if opt(bang).parse_next(input)?.is_some() {
        let inner = unary.parse_next(input)?;
        return Ok(Expr::Not(Box::new(inner)));
    }
    if opt(minus).parse_next(input)?.is_some() {
        let inner = unary.parse_next(input)?;
        return Ok(Expr::Neg(Box::new(inner)));
    }
    postfix.parse_next(input)
}

fn length_suffix<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    ".length".parse_next(input)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = primary.parse_next(input)?;
    while opt(length_suffix).parse_next(input)?.is_some() {
        expr = Expr::Length(Box::new(expr));
    }
    Ok(expr)
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    alt((
        number.map(|n| Expr::Literal(Operand::Number(n))),
        string_literal.map(|s| Expr::Literal(Operand::Text(s))),
        parenthesized,
        word,
    ))
    .parse_next(input)
}

fn decimal<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (digit1, opt(('.', digit1))).take().parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<f64> {
    let text = decimal.parse_next(input)?;
    text.parse()
        .map_err(|_| ErrMode::Backtrack(ContextError::new()))
}

fn next_char(input: &mut &str) -> ModalResult<char> {
    any.parse_next(input)
}

fn quote_char(input: &mut &str) -> ModalResult<char> {
    alt(('"', '\'')).parse_next(input)
}

/// Single- or double-quoted text with `\n`, `\t`, `\\` and quote escapes.
fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = quote_char.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = next_char.parse_next(input)?;
        match c {
            c if c == quote => break,
            '\\' => {
                let esc = next_char.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' | '"' | '\'' => s.push(esc),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

fn parenthesized(input: &mut &str) -> ModalResult<Expr> {
    delimited('(', or_expr, (ws, ')')).parse_next(input)
}

fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .parse_next(input)
}

/// Keyword literal or variable reference.
fn word(input: &mut &str) -> ModalResult<Expr> {
    let name = identifier.parse_next(input)?;
    Ok(match name {
        "true" => Expr::Literal(Operand::Bool(true)),
        "false" => Expr::Literal(Operand::Bool(false)),
        "null" => Expr::Literal(Operand::Null),
        other => Expr::Var(other.to_string()),
    })
}

/// Parse an expression and check every variable against [`VARIABLES`].
pub fn parse_expression(source: &str) -> Result<Expr> {
    if source.chars().count() > MAX_EXPRESSION_LEN {
        return Err(WeftError::Expression(format!(
            "Expression exceeds {} characters",
            MAX_EXPRESSION_LEN
        )));
    }
    if source.trim().is_empty() {
        return Err(WeftError::Expression("Expression is empty".into()));
    }

    let mut remaining = source;
    let expr = or_expr.parse_next(&mut remaining).map_err(|e| {
        WeftError::Expression(format!("Invalid expression '{}': {}", source, e))
    })?;
    let rest = remaining.trim();
    if !rest.is_empty() {
        return Err(WeftError::Expression(format!(
            "Unexpected input in '{}' at '{}'",
            source,
            rest.chars().take(20).collect::<String>()
        )));
    }

    check_variables(&expr)?;
    Ok(expr)
}

fn check_variables(expr: &Expr) -> Result<()> {
    match expr {
        Expr::Literal(_) => Ok(()),
        Expr::Var(name) if VARIABLES.contains(&name.as_str()) => Ok(()),
        Expr::Var(name) => Err(WeftError::Expression(format!(
            "Unknown variable '{}' (allowed: {})",
            name,
            VARIABLES.join(", ")
        ))),
        Expr::Not(inner) | Expr::Neg(inner) | Expr::Length(inner) => check_variables(inner),
        Expr::Binary(_, lhs, rhs) => {
            check_variables(lhs)?;
            check_variables(rhs)
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    pub fn eval(&self, vars: &Bindings) -> Result<Operand> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => Ok(vars.get(name)),
            Expr::Not(inner) => Ok(Operand::Bool(!inner.eval(vars)?.is_truthy())),
            Expr::Neg(inner) => {
                let value = inner.eval(vars)?;
                let n = value.as_number().ok_or_else(|| {
                    WeftError::Expression(format!("Cannot negate '{}'", value))
                })?;
                Ok(Operand::Number(-n))
            }
            Expr::Length(inner) => match inner.eval(vars)? {
                Operand::Text(s) => Ok(Operand::Number(s.chars().count() as f64)),
                Operand::List(items) => Ok(Operand::Number(items.len() as f64)),
                other => Err(WeftError::Expression(format!(
                    "'{}' has no length",
                    other
                ))),
            },
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let result = lhs.eval(vars)?.is_truthy() || rhs.eval(vars)?.is_truthy();
                Ok(Operand::Bool(result))
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let result = lhs.eval(vars)?.is_truthy() && rhs.eval(vars)?.is_truthy();
                Ok(Operand::Bool(result))
            }
            Expr::Binary(op, lhs, rhs) => apply(*op, lhs.eval(vars)?, rhs.eval(vars)?),
        }
    }
}

fn apply(op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Operand> {
    match op {
        BinaryOp::Eq => Ok(Operand::Bool(loose_eq(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Operand::Bool(!loose_eq(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &lhs, &rhs),
        BinaryOp::Add if lhs.is_non_numeric() || rhs.is_non_numeric() => {
            Ok(Operand::Text(format!("{}{}", lhs, rhs)))
        }
        _ => {
            let (a, b) = numeric_pair(op, &lhs, &rhs)?;
            if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
                return Err(WeftError::Expression("Division by zero".into()));
            }
            let n = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => a % b,
            };
            Ok(Operand::Number(n))
        }
    }
}

fn numeric_pair(op: BinaryOp, lhs: &Operand, rhs: &Operand) -> Result<(f64, f64)> {
    match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(WeftError::Expression(format!(
            "Operator '{}' needs numbers, got '{}' and '{}'",
            op.symbol(),
            lhs,
            rhs
        ))),
    }
}

fn loose_eq(lhs: &Operand, rhs: &Operand) -> bool {
    match (lhs, rhs) {
        (Operand::Null, Operand::Null) => true,
        (Operand::Null, _) | (_, Operand::Null) => false,
        _ => match (lhs.as_number(), rhs.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => lhs.to_string() == rhs.to_string(),
        },
    }
}

fn compare(op: BinaryOp, lhs: &Operand, rhs: &Operand) -> Result<Operand> {
    let ordering = match (lhs.as_number(), rhs.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (lhs, rhs) {
            (Operand::Text(a), Operand::Text(b)) => Some(a.cmp(b)),
            _ => {
                return Err(WeftError::Expression(format!(
                    "Cannot compare '{}' {} '{}'",
                    lhs,
                    op.symbol(),
                    rhs
                )))
            }
        },
    };
    let Some(ordering) = ordering else {
        return Ok(Operand::Bool(false));
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Operand::Bool(result))
}

/// Parse and evaluate in one step.
pub fn evaluate(source: &str, vars: &Bindings) -> Result<Operand> {
    parse_expression(source)?.eval(vars)
}

pub fn evaluate_bool(source: &str, vars: &Bindings) -> Result<bool> {
    Ok(evaluate(source, vars)?.is_truthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ab(a: serde_json::Value, b: serde_json::Value) -> Bindings {
        Bindings::new().bind("a", &a).bind("b", &b)
    }

    #[test]
    fn arithmetic_precedence() {
        let vars = ab(json!(2), json!(3));
        assert_eq!(evaluate("a + b * 2", &vars).unwrap(), Operand::Number(8.0));
        assert_eq!(evaluate("(a + b) * 2", &vars).unwrap(), Operand::Number(10.0));
        assert_eq!(evaluate("-a + 10 % 4", &vars).unwrap(), Operand::Number(0.0));
        assert_eq!(evaluate("7 / 2", &vars).unwrap(), Operand::Number(3.5));
    }

    #[test]
    fn numeric_text_is_coerced() {
        let vars = ab(json!("4"), json!(" 6 "));
        assert_eq!(evaluate("a + b", &vars).unwrap(), Operand::Number(10.0));
        assert_eq!(evaluate("a * b", &vars).unwrap().to_json(), json!(24));
    }

    #[test]
    fn plus_concatenates_non_numeric_text() {
        let vars = ab(json!("foo"), json!(1));
        assert_eq!(
            evaluate("a + b", &vars).unwrap(),
            Operand::Text("foo1".into())
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let vars = ab(json!(1), json!(0));
        assert!(matches!(
            evaluate("a / b", &vars),
            Err(WeftError::Expression(_))
        ));
        assert!(evaluate("a % b", &vars).is_err());
    }

    #[test]
    fn comparisons_and_logic() {
        let vars = Bindings::new().bind("value", &json!("hello world"));
        assert!(evaluate_bool("value.length > 5", &vars).unwrap());
        assert!(evaluate_bool("value.length > 5 && value != ''", &vars).unwrap());
        assert!(!evaluate_bool("value == \"nope\" || false", &vars).unwrap());
        assert!(evaluate_bool("!(value === 'x')", &vars).unwrap());
        assert!(evaluate_bool("'abc' < 'abd'", &vars).unwrap());
    }

    #[test]
    fn list_length() {
        let vars = Bindings::new().bind("input", &json!([1, 2, 3]));
        assert_eq!(evaluate("input.length", &vars).unwrap().to_json(), json!(3));
    }

    #[test]
    fn unbound_whitelisted_variable_is_null() {
        let vars = Bindings::new();
        assert!(evaluate_bool("value == null", &vars).unwrap());
        assert!(!evaluate_bool("value", &vars).unwrap());
    }

    #[test]
    fn unknown_variables_rejected() {
        let err = parse_expression("process.exit").unwrap_err();
        assert!(err.to_string().contains("process"));
        assert!(parse_expression("__import__").is_err());
    }

    #[test]
    fn calls_and_assignment_are_not_syntax() {
        assert!(parse_expression("a(1)").is_err());
        assert!(parse_expression("a = 1").is_err());
        assert!(parse_expression("a; b").is_err());
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn overlong_input_rejected() {
        let long = "1 + ".repeat(200) + "1";
        assert!(parse_expression(&long).is_err());
    }

    #[test]
    fn integral_results_serialize_as_integers() {
        assert_eq!(Operand::Number(42.0).to_json(), json!(42));
        assert_eq!(Operand::Number(0.5).to_json(), json!(0.5));
        assert_eq!(Operand::Number(f64::NAN).to_json(), json!(null));
    }

    #[test]
    fn string_escapes() {
        let parsed = parse_expression(r#"'it\'s' + "\n""#).unwrap();
        let out = parsed.eval(&Bindings::new()).unwrap();
        assert_eq!(out, Operand::Text("it's\n".into()));
    }
}
