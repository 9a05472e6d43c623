//! Integer expression evaluator for conditions, assignments and call arguments.
//!
//! Precedence, lowest first: `||`, `&&`, `== !=`, `< <= > >=`, `+ -`,
//! `* / %`, `^` (right-associative), unary `! - +`, primary.
//!
//! Arithmetic is signed 32-bit and saturating. Division or modulo by zero,
//! undefined variables and unknown identifiers all evaluate to 0; evaluation
//! never fails.

use std::collections::HashMap;

/// Read-only variable lookup.
pub trait Variables {
    fn get(&self, name: &str) -> Option<i32>;
}

impl Variables for HashMap<String, i32> {
    fn get(&self, name: &str) -> Option<i32> {
        HashMap::get(self, name).copied()
    }
}

/// Evaluate `expr` against `vars`.
///
/// # Example
///
/// ```
/// use std::collections::HashMap;
/// use hidscript::expr::evaluate;
///
/// let vars: HashMap<String, i32> = [("$x".to_string(), 4)].into();
/// assert_eq!(evaluate("$x * 2 + 1", &vars), 9);
/// assert_eq!(evaluate("2147483647 + 1", &vars), i32::MAX);
/// ```
pub fn evaluate(expr: &str, vars: &dyn Variables) -> i32 {
    let tokens = tokenize(expr);
    if tokens.is_empty() {
        return 0;
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        vars,
    };
    parser.or()
}

/// Evaluate as a boolean guard. Empty text is false.
pub fn evaluate_condition(expr: &str, vars: &dyn Variables) -> bool {
    evaluate(expr, vars) != 0
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i32),
    Var(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const TWO_CHAR_OPS: &[&str] = &["&&", "||", "==", "!=", "<=", ">="];
const ONE_CHAR_OPS: &[&str] = &["+", "-", "*", "/", "%", "^", "<", ">", "!"];

fn tokenize(s: &str) -> Vec<Token> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            out.push(Token::LParen);
            i += 1;
            continue;
        }
        if c == ')' {
            out.push(Token::RParen);
            i += 1;
            continue;
        }
        if c == '$' {
            if chars.get(i + 1) == Some(&'?') {
                out.push(Token::Var("$?".to_string()));
                i += 2;
                continue;
            }
            let start = i;
            i += 1;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            out.push(Token::Var(chars[start..i].iter().collect()));
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                i += 2;
                while i < chars.len() && chars[i].is_ascii_hexdigit() {
                    i += 1;
                }
                let digits: String = chars[start + 2..i].iter().collect();
                out.push(Token::Num(parse_radix(&digits, 16)));
            } else {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let digits: String = chars[start..i].iter().collect();
                out.push(Token::Num(parse_radix(&digits, 10)));
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            out.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        if let Some(next) = chars.get(i + 1) {
            let pair: String = [c, *next].iter().collect();
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| **op == pair) {
                out.push(Token::Op(*op));
                i += 2;
                continue;
            }
        }
        if c == '=' {
            out.push(Token::Op("=="));
            i += 1;
            continue;
        }
        if let Some(op) = ONE_CHAR_OPS.iter().find(|op| op.starts_with(c)) {
            out.push(Token::Op(*op));
        }
        // anything else is ignored
        i += 1;
    }
    out
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Parse an unsigned literal, saturating at `i32::MAX`.
fn parse_radix(digits: &str, radix: u32) -> i32 {
    if digits.is_empty() {
        return 0;
    }
    let mut acc: i64 = 0;
    for d in digits.chars().filter_map(|c| c.to_digit(radix)) {
        acc = acc * radix as i64 + d as i64;
        if acc > i32::MAX as i64 {
            return i32::MAX;
        }
    }
    acc as i32
}

fn clamp(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

pub(crate) fn sat_neg(v: i32) -> i32 {
    v.checked_neg().unwrap_or(i32::MAX)
}

fn sat_pow(base: i32, exp: i32) -> i32 {
    if exp < 0 {
        return 0;
    }
    let mut result: i64 = 1;
    let mut b = base as i64;
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = clamp(result * b) as i64;
        }
        e >>= 1;
        if e > 0 {
            b = clamp(b * b) as i64;
        }
    }
    result as i32
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    vars: &'a dyn Variables,
}

impl Parser<'_> {
    fn peek_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn or(&mut self) -> i32 {
        let mut left = self.and();
        while self.peek_op(&["||"]).is_some() {
            self.pos += 1;
            let right = self.and();
            left = ((left != 0) || (right != 0)) as i32;
        }
        left
    }

    fn and(&mut self) -> i32 {
        let mut left = self.equality();
        while self.peek_op(&["&&"]).is_some() {
            self.pos += 1;
            let right = self.equality();
            left = ((left != 0) && (right != 0)) as i32;
        }
        left
    }

    fn equality(&mut self) -> i32 {
        let mut left = self.relational();
        while let Some(op) = self.peek_op(&["==", "!="]) {
            self.pos += 1;
            let right = self.relational();
            left = match op {
                "==" => (left == right) as i32,
                _ => (left != right) as i32,
            };
        }
        left
    }

    fn relational(&mut self) -> i32 {
        let mut left = self.additive();
        while let Some(op) = self.peek_op(&["<", "<=", ">", ">="]) {
            self.pos += 1;
            let right = self.additive();
            let hit = match op {
                "<" => left < right,
                "<=" => left <= right,
                ">" => left > right,
                _ => left >= right,
            };
            left = hit as i32;
        }
        left
    }

    fn additive(&mut self) -> i32 {
        let mut left = self.multiplicative();
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let right = self.multiplicative();
            left = match op {
                "+" => left.saturating_add(right),
                _ => left.saturating_sub(right),
            };
        }
        left
    }

    fn multiplicative(&mut self) -> i32 {
        let mut left = self.power();
        while let Some(op) = self.peek_op(&["*", "/", "%"]) {
            self.pos += 1;
            let right = self.power();
            left = match op {
                "*" => left.saturating_mul(right),
                "/" if right == 0 => 0,
                "/" => left.checked_div(right).unwrap_or(i32::MAX),
                _ if right == 0 => 0,
                _ => left.checked_rem(right).unwrap_or(0),
            };
        }
        left
    }

    fn power(&mut self) -> i32 {
        let base = self.unary();
        if self.peek_op(&["^"]).is_some() {
            self.pos += 1;
            let exp = self.power();
            return sat_pow(base, exp);
        }
        base
    }

    fn unary(&mut self) -> i32 {
        if let Some(op) = self.peek_op(&["!", "-", "+"]) {
            self.pos += 1;
            let v = self.unary();
            return match op {
                "!" => (v == 0) as i32,
                "-" => sat_neg(v),
                _ => v,
            };
        }
        self.primary()
    }

    fn primary(&mut self) -> i32 {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return 0;
        };
        self.pos += 1;
        match token {
            Token::Num(n) => n,
            Token::Var(name) => self.vars.get(&name).unwrap_or(0),
            Token::Ident(id) => match id.to_ascii_uppercase().as_str() {
                "TRUE" => 1,
                _ => 0,
            },
            Token::LParen => {
                let v = self.or();
                if matches!(self.tokens.get(self.pos), Some(Token::RParen)) {
                    self.pos += 1;
                }
                v
            }
            Token::RParen | Token::Op(_) => 0,
        }
    }
}
