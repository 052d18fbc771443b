use crate::traits::IteratedMap;
use anyhow::{anyhow, bail, Context, Result};
use num_complex::Complex64;
use std::cell::RefCell;
use std::collections::HashMap;
use thiserror::Error;

/// Name of the state variable in map expressions.
pub const STATE_VARIABLE: &str = "z";

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Complex64` values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(Complex64),
    /// Pushes the current point `z`.
    LoadState,
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b). Fails if b is zero.
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    Sin,
    Cos,
    Exp,
    /// Principal branch of the natural logarithm. Fails at zero.
    Ln,
    Neg,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Failures while evaluating a compiled map at a point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero at z = {0}")]
    DivisionByZero(Complex64),
    #[error("logarithm of zero at z = {0}")]
    LogOfZero(Complex64),
    #[error("non-finite result {value} at z = {at}")]
    NonFinite { value: Complex64, at: Complex64 },
    #[error("malformed bytecode: stack underflow")]
    StackUnderflow,
    #[error("malformed bytecode: parameter index {0} out of range")]
    MissingParameter(usize),
}

/// Stack-based Virtual Machine for evaluating map expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `z`: The point the map is evaluated at.
/// - `params`: Parameter vector (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        z: Complex64,
        params: &[Complex64],
        stack: &mut Vec<Complex64>,
    ) -> Result<Complex64, EvalError> {
        stack.clear();
        let zero = Complex64::new(0.0, 0.0);

        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(val) => val,
                OpCode::LoadState => z,
                OpCode::LoadParam(idx) => params
                    .get(idx)
                    .copied()
                    .ok_or(EvalError::MissingParameter(idx))?,
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = stack.pop().ok_or(EvalError::StackUnderflow)?;
                    let a = stack.pop().ok_or(EvalError::StackUnderflow)?;
                    match op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => {
                            if b == zero {
                                return Err(EvalError::DivisionByZero(z));
                            }
                            a / b
                        }
                        _ => power(a, b).ok_or(EvalError::DivisionByZero(z))?,
                    }
                }
                OpCode::Sin | OpCode::Cos | OpCode::Exp | OpCode::Ln | OpCode::Neg => {
                    let a = stack.pop().ok_or(EvalError::StackUnderflow)?;
                    match op {
                        OpCode::Sin => a.sin(),
                        OpCode::Cos => a.cos(),
                        OpCode::Exp => a.exp(),
                        OpCode::Ln => {
                            if a == zero {
                                return Err(EvalError::LogOfZero(z));
                            }
                            a.ln()
                        }
                        _ => -a,
                    }
                }
            };
            stack.push(value);
        }

        let result = stack.pop().ok_or(EvalError::StackUnderflow)?;
        if !result.is_finite() {
            return Err(EvalError::NonFinite { value: result, at: z });
        }
        Ok(result)
    }
}

/// a ^ b. Integer exponents use repeated multiplication so that `0^2` is 0.
/// Returns `None` for a zero base with a non-positive exponent.
fn power(a: Complex64, b: Complex64) -> Option<Complex64> {
    let zero = Complex64::new(0.0, 0.0);
    if b.im == 0.0 && b.re.fract() == 0.0 && b.re.abs() <= i32::MAX as f64 {
        if a == zero && b.re < 0.0 {
            return None;
        }
        return Some(a.powi(b.re as i32));
    }
    if a == zero {
        return if b.re > 0.0 { Some(zero) } else { None };
    }
    Some(a.powc(b))
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // -
    Call(String, Box<Expr>),            // functions like sin(z)
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves `z`, parameter names and the imaginary unit `i`.
pub struct Compiler {
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(param_names: &[String]) -> Self {
        let mut param_map = HashMap::new();
        for (i, name) in param_names.iter().enumerate() {
            param_map.insert(name.clone(), i);
        }

        Self { param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(Complex64::new(*n, 0.0))),
            Expr::Variable(name) => {
                if name == STATE_VARIABLE {
                    ops.push(OpCode::LoadState);
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "i" {
                    ops.push(OpCode::LoadConst(Complex64::i()));
                } else {
                    bail!("Unknown variable or parameter: {}", name);
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    _ => bail!("Unknown binary operator: {}", op),
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => bail!("Unknown unary operator: {}", op),
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "ln" | "log" => OpCode::Ln,
                    _ => bail!("Unknown function: {}", func),
                });
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        bail!("Expression is empty.");
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        bail!("Unexpected trailing token {:?}", token);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if d == 'e' || d == 'E' {
                    // Exponent, e.g. 1e-3.
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '-' || sign == '+' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .with_context(|| format!("Invalid number literal '{}'", num_str))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => bail!("Unexpected character '{}'", c),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).cloned()
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_closing(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(anyhow!("Expected ')'")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than '^': -z^2 == -(z^2).
    fn parse_unary(&mut self) -> Result<Expr> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // Right associative: z^2^3 == z^(2^3).
    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let arg = self.parse_expression()?;
                    self.expect_closing()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_closing()?;
                Ok(expr)
            }
            Some(token) => Err(anyhow!("Unexpected token {:?}", token)),
            None => Err(anyhow!("Unexpected end of expression")),
        }
    }
}

// --- ExpressionMap ---

/// A complex map F(z) given as text, e.g. `"z^2 + c"`.
/// Evaluation failures (division by zero, overflow) surface as [`EvalError`].
pub struct ExpressionMap {
    source: String,
    bytecode: Bytecode,
    param_names: Vec<String>,
    params: Vec<Complex64>,
    // Interior mutability for VM stack to avoid allocation in apply.
    // Note: This makes the map !Sync.
    stack: RefCell<Vec<Complex64>>,
}

impl ExpressionMap {
    pub fn new(source: &str) -> Result<Self> {
        Self::with_params(source, &[])
    }

    pub fn with_params(source: &str, params: &[(&str, Complex64)]) -> Result<Self> {
        let mut param_names = Vec::with_capacity(params.len());
        for (name, _) in params {
            if *name == STATE_VARIABLE {
                bail!("Parameter name '{}' is reserved for the state variable.", name);
            }
            if param_names.iter().any(|existing| existing == name) {
                bail!("Duplicate parameter name '{}'.", name);
            }
            param_names.push(name.to_string());
        }

        let expr = parse(source).with_context(|| format!("Failed to parse map '{}'", source))?;
        let bytecode = Compiler::new(&param_names)
            .compile(&expr)
            .with_context(|| format!("Failed to compile map '{}'", source))?;

        Ok(Self {
            source: source.to_string(),
            bytecode,
            param_names,
            params: params.iter().map(|(_, value)| *value).collect(),
            stack: RefCell::new(Vec::with_capacity(64)),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn params(&self) -> &[Complex64] {
        &self.params
    }

    pub fn set_param(&mut self, name: &str, value: Complex64) -> Result<()> {
        let idx = self
            .param_names
            .iter()
            .position(|existing| existing == name)
            .ok_or_else(|| anyhow!("Unknown parameter '{}'", name))?;
        self.params[idx] = value;
        Ok(())
    }

    pub fn evaluate(&self, z: Complex64) -> Result<Complex64, EvalError> {
        let mut stack = self.stack.borrow_mut();
        VM::execute(&self.bytecode, z, &self.params, &mut stack)
    }
}

impl IteratedMap<Complex64> for ExpressionMap {
    type Error = EvalError;

    fn apply(&self, point: Complex64) -> Result<Complex64, EvalError> {
        self.evaluate(point)
    }
}
