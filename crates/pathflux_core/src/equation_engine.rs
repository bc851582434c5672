use crate::error::FluxError;
use crate::traits::Scalar;
use std::collections::HashMap;

/// OpCodes for the stack-based virtual machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the state component with this index.
    LoadVar(usize),
    /// Pushes the parameter with this index.
    LoadParam(usize),
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Exp,
    Sqrt,
    Abs,
    Ln,
    Tanh,
}

impl OpCode {
    /// Net change in stack depth when this instruction runs.
    fn stack_effect(&self) -> isize {
        match self {
            OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::LoadParam(_) => 1,
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => -1,
            _ => 0,
        }
    }
}

/// A compiled expression. Only the `Compiler` produces these, so every
/// instance leaves exactly one value on the stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    ops: Vec<OpCode>,
    max_depth: usize,
}

impl Bytecode {
    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    /// Upper bound on the stack size needed to run this code.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Evaluates with a scratch stack owned by the caller.
    pub fn eval<T: Scalar>(&self, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        VM::execute(self, vars, params, stack)
    }
}

/// Stack-based virtual machine for evaluating compiled expressions.
///
/// The VM is stateless; the caller owns the scratch stack, so a model can be
/// shared across threads as long as each thread brings its own stack.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val).unwrap_or_else(T::nan)),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::Add => binary(stack, |a, b| a + b),
                OpCode::Sub => binary(stack, |a, b| a - b),
                OpCode::Mul => binary(stack, |a, b| a * b),
                OpCode::Div => binary(stack, |a, b| a / b),
                OpCode::Pow => binary(stack, |a, b| a.powf(b)),
                OpCode::Neg => unary(stack, |a| -a),
                OpCode::Sin => unary(stack, |a| a.sin()),
                OpCode::Cos => unary(stack, |a| a.cos()),
                OpCode::Exp => unary(stack, |a| a.exp()),
                OpCode::Sqrt => unary(stack, |a| a.sqrt()),
                OpCode::Abs => unary(stack, |a| a.abs()),
                OpCode::Ln => unary(stack, |a| a.ln()),
                OpCode::Tanh => unary(stack, |a| a.tanh()),
            }
        }

        stack.pop().unwrap_or_else(T::nan)
    }
}

#[inline]
fn binary<T: Scalar>(stack: &mut Vec<T>, f: impl Fn(T, T) -> T) {
    if let (Some(b), Some(a)) = (stack.pop(), stack.pop()) {
        stack.push(f(a, b));
    }
}

#[inline]
fn unary<T: Scalar>(stack: &mut [T], f: impl Fn(T) -> T) {
    if let Some(top) = stack.last_mut() {
        *top = f(*top);
    }
}

// --- AST & Parser ---

/// Abstract syntax tree for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Compiles an `Expr` into `Bytecode`, resolving state variable and
/// parameter names to indices. State variables shadow parameters.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, FluxError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;

        let mut depth = 0isize;
        let mut max_depth = 0isize;
        for op in &ops {
            depth += op.stack_effect();
            max_depth = max_depth.max(depth);
        }
        debug_assert_eq!(depth, 1);
        Ok(Bytecode {
            ops,
            max_depth: max_depth as usize,
        })
    }

    /// Parses and compiles in one go.
    pub fn compile_str(&self, source: &str) -> Result<Bytecode, FluxError> {
        let expr = parse(source)?;
        self.compile(&expr)
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), FluxError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else {
                    return Err(FluxError::Expression(format!(
                        "unknown variable or parameter '{name}'"
                    )));
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
                    _ => {
                        return Err(FluxError::Expression(format!(
                            "unknown binary operator '{op}'"
                        )))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => {
                        return Err(FluxError::Expression(format!(
                            "unknown unary operator '{op}'"
                        )))
                    }
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "sqrt" => OpCode::Sqrt,
                    "abs" => OpCode::Abs,
                    "ln" => OpCode::Ln,
                    "tanh" => OpCode::Tanh,
                    _ => {
                        return Err(FluxError::Expression(format!(
                            "unknown function '{func}'"
                        )))
                    }
                });
            }
        }
        Ok(())
    }
}

// --- Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, FluxError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(FluxError::Expression(format!(
            "unexpected trailing input in '{input}'"
        )));
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

fn tokenize(input: &str) -> Result<Vec<Token>, FluxError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    literal.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !literal.contains(['e', 'E']) {
                    literal.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            literal.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| FluxError::Expression(format!("invalid number '{literal}'")))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
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
                _ => {
                    return Err(FluxError::Expression(format!(
                        "unexpected character '{c}'"
                    )))
                }
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
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> Result<(), FluxError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(FluxError::Expression("expected ')'".to_string())),
        }
    }

    // expression := term (('+' | '-') term)*
    fn parse_expression(&mut self) -> Result<Expr, FluxError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // term := unary (('*' | '/') unary)*
    fn parse_term(&mut self) -> Result<Expr, FluxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // unary := '-' unary | power
    fn parse_unary(&mut self) -> Result<Expr, FluxError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(operand)));
        }
        self.parse_power()
    }

    // power := primary ('^' unary)?   (right associative, binds tighter than unary minus)
    fn parse_power(&mut self) -> Result<Expr, FluxError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, FluxError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(FluxError::Expression(format!(
                "unexpected token {token:?}"
            ))),
            None => Err(FluxError::Expression(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(source: &str, vars: &[f64], params: &[f64]) -> f64 {
        let compiler = Compiler::new(&names(&["h", "hu"]), &names(&["g"]));
        let code = compiler.compile_str(source).expect("expression should compile");
        code.eval(vars, params, &mut Vec::new())
    }

    #[test]
    fn respects_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[0.0, 0.0], &[0.0]), 7.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[0.0, 0.0], &[0.0]), 512.0);
        assert_eq!(eval("-h ^ 2", &[3.0, 0.0], &[0.0]), -9.0);
        assert_eq!(eval("10 - 4 - 3", &[0.0, 0.0], &[0.0]), 3.0);
    }

    #[test]
    fn evaluates_shallow_water_momentum_flux() {
        let value = eval("hu^2/h + 0.5*g*h^2", &[2.0, 3.0], &[9.81]);
        assert!((value - (4.5 + 0.5 * 9.81 * 4.0)).abs() < 1e-12);
    }

    #[test]
    fn reads_scientific_notation() {
        assert!((eval("1.5e-3 * 2E2", &[0.0, 0.0], &[0.0]) - 0.3).abs() < 1e-15);
    }

    #[test]
    fn tracks_stack_depth() {
        let compiler = Compiler::new(&names(&["a", "b", "c"]), &[]);
        let code = compiler.compile_str("a + (b * c)").expect("compiles");
        assert_eq!(code.max_depth(), 3);
    }

    #[test]
    fn rejects_unknown_symbols_and_functions() {
        let compiler = Compiler::new(&names(&["h"]), &[]);
        let err = compiler.compile_str("h * u").expect_err("u is unknown");
        assert!(err.to_string().contains("unknown variable or parameter 'u'"));
        let err = compiler.compile_str("erf(h)").expect_err("erf is unsupported");
        assert!(err.to_string().contains("unknown function 'erf'"));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("1 +").is_err());
        assert!(parse("(h").is_err());
        assert!(parse("h h").is_err());
        assert!(parse("h $ 2").is_err());
    }

    #[test]
    fn evaluates_over_dual_numbers() {
        let compiler = Compiler::new(&names(&["q"]), &[]);
        let code = compiler.compile_str("0.5 * q^2").expect("compiles");
        let out = code.eval(&[Dual::new(3.0, 1.0)], &[], &mut Vec::new());
        assert!((out.val - 4.5).abs() < 1e-12);
        assert!((out.eps - 3.0).abs() < 1e-12);
    }
}
