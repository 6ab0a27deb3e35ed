use super::ToolSpec;
use crate::provider::Handle;
use async_trait::async_trait;
use linkcore::{Component, ComponentContext, ComponentOutput, NodeError, Value, ValueType};
use linkruntime::{ComponentDescriptor, ComponentFactory, PortDefinition};
use std::collections::HashMap;

/// Evaluates arithmetic expressions.
///
/// Without an expression it only emits its tool handle.
pub struct CalculatorNode;

fn tool_spec() -> ToolSpec {
    ToolSpec::single_argument(
        "calculator",
        "Evaluate an arithmetic expression with + - * / % ^ and parentheses",
        "tools.calculator",
        "expression",
        "Expression to evaluate, e.g. (2 + 3) * 4",
    )
}

#[async_trait]
impl Component for CalculatorNode {
    fn component_type(&self) -> &str {
        "tools.calculator"
    }

    async fn execute(&self, ctx: ComponentContext) -> Result<ComponentOutput, NodeError> {
        let output = ComponentOutput::new().with_output("tool", tool_spec().to_value());
        let Some(expression) = ctx.text_input("expression") else {
            return Ok(output);
        };

        let result = evaluate(expression).map_err(|e| {
            NodeError::ExecutionFailed(format!("Invalid expression '{}': {}", expression, e))
        })?;

        Ok(output
            .with_output("result", result)
            .with_output("text", format_number(result)))
    }
}

pub struct CalculatorFactory {
    descriptor: ComponentDescriptor,
}

impl CalculatorFactory {
    pub fn new() -> Self {
        Self {
            descriptor: ComponentDescriptor::new("tools.calculator", "tools")
                .display_name("Calculator")
                .description("Evaluate an arithmetic expression (+ - * / % ^ and parentheses)")
                .input(
                    PortDefinition::optional("expression", ValueType::Text)
                        .describe("When empty only the tool handle is produced"),
                )
                .output(PortDefinition::optional("result", ValueType::Number))
                .output(PortDefinition::optional("text", ValueType::Text))
                .output(PortDefinition::required("tool", ValueType::Tool))
                .cacheable(),
        }
    }
}

impl Default for CalculatorFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentFactory for CalculatorFactory {
    fn create(&self, _config: &HashMap<String, Value>) -> Result<Box<dyn Component>, NodeError> {
        Ok(Box::new(CalculatorNode))
    }

    fn descriptor(&self) -> &ComponentDescriptor {
        &self.descriptor
    }
}

/// `3.0` prints as `3`
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[start..end];
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| format!("bad number '{}'", literal))?;
                tokens.push(Token::Number(n));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            other => return Err(format!("unexpected character '{}'", other)),
        }
    }

    Ok(tokens)
}

/// Recursive descent over
///
/// ```text
/// expr  := term (('+' | '-') term)*
/// term  := unary (('*' | '/' | '%') unary)*
/// unary := '-' unary | '+' unary | power
/// power := atom ('^' unary)?
/// atom  := number | '(' expr ')'
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

/// Deepest nesting of signs, parentheses and exponents accepted
const MAX_DEPTH: usize = 200;

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, String> {
        // every recursive path passes through here
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err("missing ')'".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected {:?}", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64, String> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {:?}", token));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".to_string());
    }
    Ok(value)
}
