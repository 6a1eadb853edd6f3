//! Sandboxed boolean expressions for Condition nodes.
//!
//! A deliberately small grammar replaces arbitrary host-language
//! evaluation: boolean connectives over string predicates and length
//! comparisons, applied to the condition's input text. Nothing else.
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | "true" | "false"
//!          | ( "contains" | "starts_with" | "ends_with" | "matches" ) "(" string ")"
//!          | "length" cmp number
//! cmp     := ">" | ">=" | "<" | "<=" | "=="
//! ```

use regex::Regex;

/// Parse and evaluate `source` against `input`.
pub fn evaluate(source: &str, input: &str) -> Result<bool, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        input,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        ));
    }
    Ok(value)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(usize),
    Op(String),
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if chars.get(i + 1) == Some(&'"') => {
                            s.push('"');
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '&' | '|' | '!' | '>' | '<' | '=' => {
                let mut op = String::from(c);
                if let Some(next) = chars.get(i + 1) {
                    if matches!((c, next), ('&', '&') | ('|', '|') | ('>', '=') | ('<', '=') | ('=', '=')) {
                        op.push(*next);
                    }
                }
                i += op.len();
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal
                    .parse()
                    .map_err(|_| format!("invalid number \"{literal}\""))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    input: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, expected: &Token) -> Result<(), String> {
        match self.peek() {
            Some(t) if t == expected => {
                self.pos += 1;
                Ok(())
            }
            other => Err(format!("expected {expected:?}, found {other:?}")),
        }
    }

    fn expr(&mut self) -> Result<bool, String> {
        let mut value = self.and()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "||") {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, String> {
        let mut value = self.unary()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "&&") {
            self.pos += 1;
            let rhs = self.unary()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<bool, String> {
        if matches!(self.peek(), Some(Token::Op(op)) if op == "!") {
            self.pos += 1;
            return Ok(!self.unary()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        match self.peek().cloned() {
            Some(Token::LParen) => {
                self.pos += 1;
                let value = self.expr()?;
                self.eat(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => Ok(true),
                    "false" => Ok(false),
                    "length" => self.length_comparison(),
                    "contains" | "starts_with" | "ends_with" | "matches" => {
                        self.predicate(&name)
                    }
                    other => Err(format!("unknown identifier \"{other}\"")),
                }
            }
            other => Err(format!("expected expression, found {other:?}")),
        }
    }

    fn predicate(&mut self, name: &str) -> Result<bool, String> {
        self.eat(&Token::LParen)?;
        let arg = match self.peek().cloned() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                s
            }
            other => return Err(format!("{name} expects a string literal, found {other:?}")),
        };
        self.eat(&Token::RParen)?;
        match name {
            "contains" => Ok(self.input.contains(&arg)),
            "starts_with" => Ok(self.input.starts_with(&arg)),
            "ends_with" => Ok(self.input.ends_with(&arg)),
            "matches" => {
                let re = Regex::new(&arg).map_err(|e| format!("invalid regex: {e}"))?;
                Ok(re.is_match(self.input))
            }
            _ => unreachable!("predicate names are filtered by the caller"),
        }
    }

    fn length_comparison(&mut self) -> Result<bool, String> {
        let op = match self.peek().cloned() {
            Some(Token::Op(op)) if matches!(op.as_str(), ">" | ">=" | "<" | "<=" | "==") => {
                self.pos += 1;
                op
            }
            other => return Err(format!("length expects a comparison, found {other:?}")),
        };
        let n = match self.peek().cloned() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                n
            }
            other => return Err(format!("length comparison expects a number, found {other:?}")),
        };
        let len = self.input.chars().count();
        Ok(match op.as_str() {
            ">" => len > n,
            ">=" => len >= n,
            "<" => len < n,
            "<=" => len <= n,
            "==" => len == n,
            _ => unreachable!("operator set is checked above"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_apply_to_input() {
        assert!(evaluate(r#"contains("llo")"#, "hello").unwrap());
        assert!(evaluate(r#"starts_with("he")"#, "hello").unwrap());
        assert!(evaluate(r#"ends_with("lo")"#, "hello").unwrap());
        assert!(evaluate(r#"matches("^h.*o$")"#, "hello").unwrap());
        assert!(!evaluate(r#"contains("xyz")"#, "hello").unwrap());
    }

    #[test]
    fn boolean_connectives_and_grouping() {
        assert!(evaluate(r#"contains("h") && length > 3"#, "hello").unwrap());
        assert!(evaluate(r#"contains("x") || contains("h")"#, "hello").unwrap());
        assert!(evaluate(r#"!(length < 3)"#, "hello").unwrap());
        assert!(evaluate("true && !false", "").unwrap());
    }

    #[test]
    fn length_comparisons() {
        assert!(evaluate("length == 5", "hello").unwrap());
        assert!(evaluate("length >= 5", "hello").unwrap());
        assert!(!evaluate("length > 5", "hello").unwrap());
    }

    #[test]
    fn parse_errors_are_reported_not_panicked() {
        assert!(evaluate("contains(", "x").is_err());
        assert!(evaluate("eval(\"danger\")", "x").is_err());
        assert!(evaluate("length > ", "x").is_err());
        assert!(evaluate("true false", "x").is_err());
    }

    #[test]
    fn escaped_quotes_in_string_literals() {
        assert!(evaluate(r#"contains("say \"hi\"")"#, r#"they say "hi" often"#).unwrap());
    }
}
