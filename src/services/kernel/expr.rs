//! `safe_eval` — a minimal, side-effect-free arithmetic expression
//! evaluator.
//!
//! Grammar: literal numerics, `+ - * / ** %`, unary minus, parentheses,
//! the function calls `abs`, `round`, `min`, `max`, and variable
//! references resolved against a caller-supplied `vars` map. No attribute
//! access, no name resolution outside `vars`, no statements.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use super::error::KernelError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Decimal),
    Ident(String),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(d) => write!(f, "{d}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::StarStar => write!(f, "**"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
        }
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, KernelError> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            },
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            },
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::StarStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            },
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            },
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            },
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            },
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            },
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            },
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = Decimal::from_str(&text).map_err(|_| {
                    KernelError::ExprSyntaxError(format!("invalid numeric literal '{text}'"))
                })?;
                tokens.push(Token::Num(value));
            },
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            },
            other => {
                return Err(KernelError::ExprSyntaxError(format!(
                    "unexpected character '{other}'"
                )));
            },
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: &'a HashMap<String, Decimal>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, tok: &Token) -> Result<(), KernelError> {
        match self.advance() {
            Some(t) if t == tok => Ok(()),
            Some(t) => Err(KernelError::ExprSyntaxError(format!(
                "expected '{tok}', found '{t}'"
            ))),
            None => Err(KernelError::ExprSyntaxError(format!(
                "expected '{tok}', found end of expression"
            ))),
        }
    }

    // expr := term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<Decimal, KernelError> {
        let mut value = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = value
                        .checked_add(rhs)
                        .ok_or_else(|| KernelError::ExprMathError("addition overflow".into()))?;
                },
                Some(Token::Minus) => {
                    self.advance();
                    let rhs = self.parse_term()?;
                    value = value.checked_sub(rhs).ok_or_else(|| {
                        KernelError::ExprMathError("subtraction overflow".into())
                    })?;
                },
                _ => break,
            }
        }
        Ok(value)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<Decimal, KernelError> {
        let mut value = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    value = value.checked_mul(rhs).ok_or_else(|| {
                        KernelError::ExprMathError("multiplication overflow".into())
                    })?;
                },
                Some(Token::Slash) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    if rhs.is_zero() {
                        return Err(KernelError::ExprMathError("division by zero".into()));
                    }
                    value = value
                        .checked_div(rhs)
                        .ok_or_else(|| KernelError::ExprMathError("division overflow".into()))?;
                },
                Some(Token::Percent) => {
                    self.advance();
                    let rhs = self.parse_unary()?;
                    if rhs.is_zero() {
                        return Err(KernelError::ExprMathError("modulo by zero".into()));
                    }
                    value = value
                        .checked_rem(rhs)
                        .ok_or_else(|| KernelError::ExprMathError("modulo overflow".into()))?;
                },
                _ => break,
            }
        }
        Ok(value)
    }

    // unary := '-' unary | power
    fn parse_unary(&mut self) -> Result<Decimal, KernelError> {
        if let Some(Token::Minus) = self.peek() {
            self.advance();
            let value = self.parse_unary()?;
            return value
                .checked_neg()
                .ok_or_else(|| KernelError::ExprMathError("negation overflow".into()));
        }
        self.parse_power()
    }

    // power := primary ('**' unary)?  (right-associative)
    fn parse_power(&mut self) -> Result<Decimal, KernelError> {
        let base = self.parse_primary()?;
        if let Some(Token::StarStar) = self.peek() {
            self.advance();
            let exponent = self.parse_unary()?;
            return decimal_pow(base, exponent);
        }
        Ok(base)
    }

    // primary := number | ident ['(' args ')'] | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Decimal, KernelError> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            },
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.advance();
                    let args = self.parse_args()?;
                    self.expect(&Token::RParen)?;
                    call_function(&name, &args)
                } else {
                    self.vars.get(&name).copied().ok_or_else(|| {
                        KernelError::ExprNameError(format!("unknown variable '{name}'"))
                    })
                }
            },
            Some(other) => Err(KernelError::ExprSyntaxError(format!(
                "unexpected token '{other}'"
            ))),
            None => Err(KernelError::ExprSyntaxError(
                "unexpected end of expression".into(),
            )),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Decimal>, KernelError> {
        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            return Ok(args);
        }
        args.push(self.parse_expr()?);
        while let Some(Token::Comma) = self.peek() {
            self.advance();
            args.push(self.parse_expr()?);
        }
        Ok(args)
    }
}

fn call_function(name: &str, args: &[Decimal]) -> Result<Decimal, KernelError> {
    match name {
        "abs" => {
            let [a] = one_arg(name, args)?;
            Ok(a.abs())
        },
        "round" => match args.len() {
            1 => Ok(args[0].round()),
            2 => {
                let dp: u32 = args[1].to_string().parse().map_err(|_| {
                    KernelError::ExprSyntaxError(format!(
                        "round() second argument must be a non-negative integer, got {}",
                        args[1]
                    ))
                })?;
                Ok(args[0].round_dp(dp))
            },
            n => Err(KernelError::ExprSyntaxError(format!(
                "round() takes 1 or 2 arguments, got {n}"
            ))),
        },
        "min" => {
            if args.is_empty() {
                return Err(KernelError::ExprSyntaxError(
                    "min() requires at least one argument".into(),
                ));
            }
            Ok(args.iter().copied().min().unwrap())
        },
        "max" => {
            if args.is_empty() {
                return Err(KernelError::ExprSyntaxError(
                    "max() requires at least one argument".into(),
                ));
            }
            Ok(args.iter().copied().max().unwrap())
        },
        other => Err(KernelError::ExprNameError(format!(
            "unknown function '{other}'"
        ))),
    }
}

fn one_arg(name: &str, args: &[Decimal]) -> Result<[Decimal; 1], KernelError> {
    if args.len() != 1 {
        return Err(KernelError::ExprSyntaxError(format!(
            "{name}() takes exactly 1 argument, got {}",
            args.len()
        )));
    }
    Ok([args[0]])
}

/// Integer-exponent power. Non-integer exponents are rejected as a math
/// error rather than approximated through floating point.
fn decimal_pow(base: Decimal, exponent: Decimal) -> Result<Decimal, KernelError> {
    if exponent.fract() != Decimal::ZERO {
        return Err(KernelError::ExprMathError(
            "non-integer exponents are not supported".into(),
        ));
    }
    let exp_i64: i64 = exponent.to_string().parse().map_err(|_| {
        KernelError::ExprMathError(format!("exponent '{exponent}' out of range"))
    })?;

    if exp_i64 == 0 {
        return Ok(Decimal::ONE);
    }

    if base.is_zero() && exp_i64 < 0 {
        return Err(KernelError::ExprMathError(
            "cannot raise zero to a negative power".into(),
        ));
    }

    let magnitude = exp_i64.unsigned_abs();
    let mut result = Decimal::ONE;
    for _ in 0..magnitude {
        result = result
            .checked_mul(base)
            .ok_or_else(|| KernelError::ExprMathError("power overflow".into()))?;
    }

    if exp_i64 < 0 {
        result = Decimal::ONE
            .checked_div(result)
            .ok_or_else(|| KernelError::ExprMathError("power overflow".into()))?;
    }

    Ok(result)
}

/// Evaluate `expr` against `vars`. No attribute access, no name resolution
/// outside `vars`, no statements — just the fixed arithmetic grammar.
pub fn safe_eval(expr: &str, vars: &HashMap<String, Decimal>) -> Result<Decimal, KernelError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(KernelError::ExprSyntaxError("empty expression".into()));
    }
    let mut parser = Parser { tokens: &tokens, pos: 0, vars };
    let value = parser.parse_expr()?;
    if parser.pos != tokens.len() {
        return Err(KernelError::ExprSyntaxError(format!(
            "unexpected trailing token '{}'",
            tokens[parser.pos]
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, Decimal> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Decimal::from_str(v).unwrap()))
            .collect()
    }

    #[test]
    fn arithmetic_precedence() {
        let v = safe_eval("2 + 3 * 4", &HashMap::new()).unwrap();
        assert_eq!(v, Decimal::from(14));
    }

    #[test]
    fn parentheses_override_precedence() {
        let v = safe_eval("(2 + 3) * 4", &HashMap::new()).unwrap();
        assert_eq!(v, Decimal::from(20));
    }

    #[test]
    fn power_is_right_associative() {
        // 2 ** (3 ** 2) = 2 ** 9 = 512, not (2 ** 3) ** 2 = 64.
        let v = safe_eval("2 ** 3 ** 2", &HashMap::new()).unwrap();
        assert_eq!(v, Decimal::from(512));
    }

    #[test]
    fn variable_substitution() {
        let v = safe_eval("actual / target * 100", &vars(&[("actual", "237525"), ("target", "250000")]))
            .unwrap();
        assert_eq!(v, Decimal::from_str("95.01").unwrap());
    }

    #[test]
    fn unknown_variable_is_name_error() {
        let err = safe_eval("x + 1", &HashMap::new()).unwrap_err();
        assert!(matches!(err, KernelError::ExprNameError(_)));
    }

    #[test]
    fn unknown_function_is_name_error() {
        let err = safe_eval("sqrt(4)", &HashMap::new()).unwrap_err();
        assert!(matches!(err, KernelError::ExprNameError(_)));
    }

    #[test]
    fn division_by_zero_is_math_error_not_inf() {
        let err = safe_eval("1 / 0", &HashMap::new()).unwrap_err();
        assert!(matches!(err, KernelError::ExprMathError(_)));
    }

    #[test]
    fn malformed_expression_is_syntax_error() {
        let err = safe_eval("1 + + ", &HashMap::new()).unwrap_err();
        assert!(matches!(err, KernelError::ExprSyntaxError(_)));
    }

    #[test]
    fn functions_and_unary_minus() {
        let v = safe_eval("abs(-5) + round(3.456, 2)", &HashMap::new()).unwrap();
        assert_eq!(v, Decimal::from_str("8.46").unwrap());
    }

    #[test]
    fn min_max_variadic() {
        assert_eq!(safe_eval("max(1, 5, 3)", &HashMap::new()).unwrap(), Decimal::from(5));
        assert_eq!(safe_eval("min(1, 5, 3)", &HashMap::new()).unwrap(), Decimal::from(1));
    }

    #[test]
    fn negative_integer_exponent() {
        let v = safe_eval("2 ** -2", &HashMap::new()).unwrap();
        assert_eq!(v, Decimal::from_str("0.25").unwrap());
    }

    #[test]
    fn no_attribute_or_statement_syntax() {
        // Anything outside the fixed grammar is a syntax error, not silently
        // evaluated.
        let err = safe_eval("a.b", &HashMap::new()).unwrap_err();
        assert!(matches!(err, KernelError::ExprSyntaxError(_)));
    }
}
