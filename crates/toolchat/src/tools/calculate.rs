use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use toolchat_core::tool::{Error as ToolError, Tool, schema_for};

// Integral results below this magnitude are exact in an `f64`.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

// Parentheses, signs, function calls and exponents nest at most this deep.
const MAX_DEPTH: usize = 256;

#[derive(Deserialize, JsonSchema)]
pub struct CalculateParameters {
    #[schemars(
        description = "Mathematical expression to evaluate, e.g. \"2 + 2 * 3\""
    )]
    expression: String,
}

/// A tool that evaluates arithmetic expressions.
///
/// Supports `+ - * / % ^`, parentheses, the constants `pi` and `e`, and the
/// functions `sqrt abs ln log floor ceil round sin cos tan`.
pub struct CalculateTool {
    parameter_schema: Value,
}

impl CalculateTool {
    /// Creates a new calculate tool.
    #[inline]
    pub fn new() -> Self {
        CalculateTool {
            parameter_schema: schema_for::<CalculateParameters>(),
        }
    }
}

impl Default for CalculateTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculateTool {
    type Input = CalculateParameters;
    type Output = Value;

    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Perform mathematical calculations"
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: CalculateParameters,
    ) -> impl Future<Output = Result<Value, ToolError>> + Send + 'static {
        let result = evaluate(&input.expression)
            .map(number_value)
            .map_err(|err| ToolError::execution_error().with_reason(err.to_string()));
        std::future::ready(result)
    }
}

fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < MAX_EXACT_INTEGER {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CalcError {
    /// A character that does not fit the grammar, with its byte offset.
    #[error("unexpected `{0}` at position {1}")]
    Unexpected(char, usize),
    /// The expression stops in the middle of a term.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// A malformed number literal, like a lone `.`.
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    /// A name that is neither a constant nor a function.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// The result is infinite or NaN, e.g. `sqrt(-1)`.
    #[error("result is not a finite number")]
    NotFinite,
    /// The expression nests deeper than the evaluator allows.
    #[error("expression is nested too deeply")]
    TooDeep,
}

/// Evaluates an expression of the grammar:
///
/// ```text
/// expr   = term { ("+" | "-") term }
/// term   = unary { ("*" | "/" | "%") unary }
/// unary  = ("-" | "+") unary | power
/// power  = atom [ "^" unary ]
/// atom   = number | constant | function "(" expr ")" | "(" expr ")"
/// ```
pub fn evaluate(expression: &str) -> Result<f64, CalcError> {
    let mut parser = Parser {
        src: expression,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(c) = parser.peek() {
        return Err(CalcError::Unexpected(c, parser.pos));
    }
    if !value.is_finite() {
        return Err(CalcError::NotFinite);
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Runs `parse` one level deeper, failing once `MAX_DEPTH` is reached.
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<f64, CalcError>,
    ) -> Result<f64, CalcError> {
        if self.depth >= MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Skips whitespace and returns the next character.
    fn peek(&mut self) -> Option<char> {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
        trimmed.chars().next()
    }

    fn bump(&mut self, c: char) {
        self.pos += c.len_utf8();
    }

    fn expect(&mut self, expected: char) -> Result<(), CalcError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump(c);
                Ok(())
            }
            Some(c) => Err(CalcError::Unexpected(c, self.pos)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, CalcError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some('+') => {
                    self.bump('+');
                    value += self.term()?;
                }
                Some('-') => {
                    self.bump('-');
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, CalcError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some('*') => {
                    self.bump('*');
                    value *= self.unary()?;
                }
                Some(op @ ('/' | '%')) => {
                    self.bump(op);
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(CalcError::DivisionByZero);
                    }
                    if op == '/' {
                        value /= rhs;
                    } else {
                        value %= rhs;
                    }
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some('-') => {
                self.bump('-');
                Ok(-self.nested(Self::unary)?)
            }
            Some('+') => {
                self.bump('+');
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, CalcError> {
        let base = self.atom()?;
        if self.peek() == Some('^') {
            self.bump('^');
            // Right associative: 2^3^2 = 2^9.
            let exponent = self.nested(Self::unary)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, CalcError> {
        match self.peek() {
            Some('(') => {
                self.bump('(');
                let value = self.nested(Self::expr)?;
                self.expect(')')?;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.identifier(),
            Some(c) => Err(CalcError::Unexpected(c, self.pos)),
            None => Err(CalcError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        let digits = |mut i: usize| {
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            i
        };

        let mut end = digits(start);
        if end < bytes.len() && bytes[end] == b'.' {
            end = digits(end + 1);
        }
        // An exponent only counts when digits follow it.
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp = end + 1;
            if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
                exp += 1;
            }
            let exp_end = digits(exp);
            if exp_end > exp {
                end = exp_end;
            }
        }

        let literal = &self.src[start..end];
        self.pos = end;
        literal
            .parse()
            .map_err(|_| CalcError::InvalidNumber(literal.to_owned()))
    }

    fn identifier(&mut self) -> Result<f64, CalcError> {
        let start = self.pos;
        let len = self
            .rest()
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(self.rest().len());
        self.pos += len;
        let name = self.src[start..self.pos].to_ascii_lowercase();

        match name.as_str() {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        let function: fn(f64) -> f64 = match name.as_str() {
            "sqrt" => f64::sqrt,
            "abs" => f64::abs,
            "ln" => f64::ln,
            "log" => f64::log10,
            "floor" => f64::floor,
            "ceil" => f64::ceil,
            "round" => f64::round,
            "sin" => f64::sin,
            "cos" => f64::cos,
            "tan" => f64::tan,
            _ => return Err(CalcError::UnknownIdentifier(name.clone())),
        };
        self.expect('(')?;
        let argument = self.nested(Self::expr)?;
        self.expect(')')?;
        Ok(function(argument))
    }
}
