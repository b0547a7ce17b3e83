//! Parser for the body of a `{{ ... }}` expression.
//!
//! ```text
//! pipeline  := head ( '|' call )*
//! head      := reference | call | literal
//! reference := '$' root segment*
//! segment   := '.' ident | '.' number | '[' ( number | string ) ']'
//! call      := ident ( '(' ( operand ( ',' operand )* )? ')' )?
//! operand   := reference | literal
//! ```

use serde_json::{Number, Value};

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Root {
    Trigger,
    Node(String),
    Prev,
    Vars,
    Env,
    Loop,
    Execution,
    Workflow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    Index(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub root: Root,
    pub path: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Ref(Reference),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    Ref(Reference),
    Call(Call),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub head: Head,
    pub pipes: Vec<Call>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Ident(String),
    Str(String),
    Num(Number),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Pipe,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(EvalError::syntax(format!("unterminated string in '{}'", input))),
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(other) => s.push(*other),
                                None => return Err(EvalError::syntax(format!("unterminated string in '{}'", input))),
                            }
                            i += 2;
                        }
                        Some(ch) if *ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                let start = i + 1;
                i = start;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                if i == start {
                    return Err(EvalError::syntax(format!("expected a name after '$' in '{}'", input)));
                }
                tokens.push(Token::Var(chars[start..i].iter().collect()));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                // a '.' directly after a path segment is a separator, not a decimal point
                let after_dot = matches!(tokens.last(), Some(Token::Dot));
                while i < chars.len() && (chars[i].is_ascii_digit() || (!after_dot && chars[i] == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()))) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = if text.contains('.') {
                    text.parse::<f64>().ok().and_then(Number::from_f64)
                } else {
                    text.parse::<i64>().ok().map(Number::from)
                };
                match num {
                    Some(n) => tokens.push(Token::Num(n)),
                    None => return Err(EvalError::syntax(format!("invalid number '{}'", text))),
                }
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(EvalError::syntax(format!("unexpected character '{}' in '{}'", other, input))),
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

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(
        &mut self,
        expected: Token,
    ) -> Result<(), EvalError> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(EvalError::syntax(format!("expected {:?}, found {:?}", expected, t))),
            None => Err(EvalError::syntax(format!("expected {:?}, found end of expression", expected))),
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, EvalError> {
        let head = match self.peek().cloned() {
            Some(Token::Var(_)) => Head::Ref(self.reference()?),
            Some(Token::Ident(name)) if !matches!(name.as_str(), "true" | "false" | "null") => Head::Call(self.call()?),
            Some(_) => Head::Literal(self.literal()?),
            None => return Err(EvalError::syntax("empty expression")),
        };

        let mut pipes = Vec::new();
        while let Some(token) = self.next() {
            match token {
                Token::Pipe => pipes.push(self.call()?),
                other => return Err(EvalError::syntax(format!("unexpected {:?}", other))),
            }
        }

        Ok(Pipeline {
            head,
            pipes,
        })
    }

    fn reference(&mut self) -> Result<Reference, EvalError> {
        let name = match self.next() {
            Some(Token::Var(name)) => name,
            _ => return Err(EvalError::syntax("expected a reference")),
        };
        let root = match name.as_str() {
            "trigger" => Root::Trigger,
            "prev" => Root::Prev,
            "vars" => Root::Vars,
            "env" => Root::Env,
            "loop" => Root::Loop,
            "execution" => Root::Execution,
            "workflow" => Root::Workflow,
            "node" => match self.segment()? {
                Some(Segment::Key(node)) => Root::Node(node),
                _ => return Err(EvalError::syntax("$node must be followed by a node name or id")),
            },
            other => return Err(EvalError::unknown_reference(format!("unknown reference '${}'", other))),
        };

        let mut path = Vec::new();
        while let Some(segment) = self.segment()? {
            path.push(segment);
        }

        Ok(Reference {
            root,
            path,
        })
    }

    fn segment(&mut self) -> Result<Option<Segment>, EvalError> {
        match self.peek() {
            Some(Token::Dot) => {
                self.pos += 1;
                match self.next() {
                    Some(Token::Ident(key)) => Ok(Some(Segment::Key(key))),
                    Some(Token::Num(n)) => match n.as_i64() {
                        Some(i) => Ok(Some(Segment::Index(i))),
                        None => Err(EvalError::syntax(format!("invalid index '{}'", n))),
                    },
                    _ => Err(EvalError::syntax("expected a key after '.'")),
                }
            }
            Some(Token::LBracket) => {
                self.pos += 1;
                let segment = match self.next() {
                    Some(Token::Str(key)) => Segment::Key(key),
                    Some(Token::Num(n)) => match n.as_i64() {
                        Some(i) => Segment::Index(i),
                        None => return Err(EvalError::syntax(format!("invalid index '{}'", n))),
                    },
                    _ => return Err(EvalError::syntax("expected an index or a quoted key inside '[]'")),
                };
                self.expect(Token::RBracket)?;
                Ok(Some(segment))
            }
            _ => Ok(None),
        }
    }

    fn call(&mut self) -> Result<Call, EvalError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(t) => return Err(EvalError::syntax(format!("expected a function name, found {:?}", t))),
            None => return Err(EvalError::syntax("expected a function name")),
        };

        let mut args = Vec::new();
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            if self.peek() == Some(&Token::RParen) {
                self.pos += 1;
            } else {
                loop {
                    args.push(self.operand()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RParen) => break,
                        _ => return Err(EvalError::syntax(format!("unclosed argument list for '{}'", name))),
                    }
                }
            }
        }

        Ok(Call {
            name,
            args,
        })
    }

    fn operand(&mut self) -> Result<Operand, EvalError> {
        match self.peek() {
            Some(Token::Var(_)) => Ok(Operand::Ref(self.reference()?)),
            _ => Ok(Operand::Literal(self.literal()?)),
        }
    }

    fn literal(&mut self) -> Result<Value, EvalError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Num(n)) => Ok(Value::Number(n)),
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(EvalError::syntax(format!("unexpected word '{}'", word))),
            },
            Some(t) => Err(EvalError::syntax(format!("unexpected {:?}", t))),
            None => Err(EvalError::syntax("unexpected end of expression")),
        }
    }
}

pub fn parse(expr: &str) -> Result<Pipeline, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(expr)?,
        pos: 0,
    };
    parser.pipeline()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::EvalErrorKind;

    #[test]
    fn test_parse_paths() {
        let p = parse(r#"$node["Fetch User"].items[0].name"#).unwrap();
        assert_eq!(
            p.head,
            Head::Ref(Reference {
                root: Root::Node("Fetch User".to_string()),
                path: vec![Segment::Key("items".to_string()), Segment::Index(0), Segment::Key("name".to_string())],
            })
        );

        let p = parse("$prev.items.length").unwrap();
        assert_eq!(
            p.head,
            Head::Ref(Reference {
                root: Root::Prev,
                path: vec![Segment::Key("items".to_string()), Segment::Key("length".to_string())],
            })
        );

        let p = parse("$trigger.rows.1.id").unwrap();
        match p.head {
            Head::Ref(r) => assert_eq!(r.path[1], Segment::Index(1)),
            other => panic!("unexpected head {:?}", other),
        }
    }

    #[test]
    fn test_parse_pipes_and_calls() {
        let p = parse(r#" $trigger.email | lower | split("@") | last "#).unwrap();
        assert_eq!(p.pipes.len(), 3);
        assert_eq!(p.pipes[1].args, vec![Operand::Literal(json!("@"))]);

        let p = parse("now()").unwrap();
        assert!(matches!(p.head, Head::Call(ref c) if c.name == "now" && c.args.is_empty()));

        let p = parse("$vars.missing | default($trigger.fallback)").unwrap();
        assert!(matches!(p.pipes[0].args[0], Operand::Ref(_)));

        let p = parse("$vars.items[-1] | slice(0, 2.5)").unwrap();
        assert_eq!(p.pipes[0].args[1], Operand::Literal(json!(2.5)));
    }

    #[test]
    fn test_literal_heads() {
        assert_eq!(parse("42").unwrap().head, Head::Literal(json!(42)));
        assert_eq!(parse("'hi'").unwrap().head, Head::Literal(json!("hi")));
        assert_eq!(parse("true").unwrap().head, Head::Literal(json!(true)));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(parse("").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("$trigger.").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("$node").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("$trigger | split(\"a\"").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("\"open").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("$trigger $prev").unwrap_err().kind, EvalErrorKind::Syntax);
        assert_eq!(parse("$bogus.x").unwrap_err().kind, EvalErrorKind::UnknownReference);
    }
}
