//! AST text reader: s-expression tokenizer and typed tree builder.

use hashbrown::HashMap;

use super::ReadError;
use crate::ast::{
    ArithOp, Expr, LValue, LogicalOp, Position, Program, RelOp, Stmt, UnaryOp, ValueType, VarDecl,
};
use crate::core::symbols::{signature, Library};

/// One parsed s-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<'a> {
    Atom { text: &'a str, pos: Position },
    Str { value: String, pos: Position },
    List { items: Vec<Node<'a>>, pos: Position },
}

impl<'a> Node<'a> {
    pub fn pos(&self) -> Position {
        match self {
            Node::Atom { pos, .. } | Node::Str { pos, .. } | Node::List { pos, .. } => *pos,
        }
    }

    fn atom(&self) -> Option<&'a str> {
        match self {
            Node::Atom { text, .. } => Some(*text),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Node::Atom { text, .. } => format!("'{text}'"),
            Node::Str { value, .. } => format!("string {value:?}"),
            Node::List { .. } => "list".to_string(),
        }
    }
}

pub fn parse_nodes(text: &str) -> Result<Vec<Node<'_>>, ReadError> {
    let mut reader = Reader::new(text);
    let mut nodes = Vec::new();
    reader.skip_whitespace();
    while !reader.is_eof() {
        nodes.push(reader.node()?);
        reader.skip_whitespace();
    }
    Ok(nodes)
}

struct Reader<'a> {
    text: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Reader<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0, line: 1, column: 1 }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                // Skip comment line
                while let Some(ch) = self.current_char() {
                    self.advance();
                    if ch == '\n' {
                        break;
                    }
                }
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn node(&mut self) -> Result<Node<'a>, ReadError> {
        self.skip_whitespace();
        let pos = self.position();
        match self.current_char() {
            None => Err(ReadError::UnexpectedEof { position: pos }),
            Some('(') => {
                self.advance();
                let mut items = Vec::new();
                loop {
                    self.skip_whitespace();
                    match self.current_char() {
                        None => return Err(ReadError::UnexpectedEof { position: self.position() }),
                        Some(')') => {
                            self.advance();
                            return Ok(Node::List { items, pos });
                        }
                        Some(_) => items.push(self.node()?),
                    }
                }
            }
            Some(')') => Err(ReadError::Unexpected { position: pos, found: "')'".to_string() }),
            Some('"') => self.string(pos),
            Some(_) => {
                let start = self.pos;
                while let Some(ch) = self.current_char() {
                    if ch.is_whitespace() || matches!(ch, '(' | ')' | '"' | ';') {
                        break;
                    }
                    self.advance();
                }
                Ok(Node::Atom { text: &self.text[start..self.pos], pos })
            }
        }
    }

    fn string(&mut self, pos: Position) -> Result<Node<'a>, ReadError> {
        self.advance();
        let mut value = String::new();
        loop {
            match self.current_char() {
                None | Some('\n') => return Err(ReadError::UnterminatedString { position: pos }),
                Some('"') => {
                    self.advance();
                    return Ok(Node::Str { value, pos });
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(other) => {
                            return Err(ReadError::Unexpected {
                                position: self.position(),
                                found: format!("escape '\\{other}'"),
                            })
                        }
                        None => return Err(ReadError::UnterminatedString { position: pos }),
                    };
                    value.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    value.push(ch);
                    self.advance();
                }
            }
        }
    }
}

/// Builds a typed program from parsed nodes.
pub struct Builder<'l> {
    library: &'l Library,
    variables: HashMap<String, VarDecl>,
}

impl<'l> Builder<'l> {
    pub fn new(library: &'l Library) -> Self {
        Self { library, variables: HashMap::new() }
    }

    pub fn program(mut self, nodes: &[Node<'_>]) -> Result<Program, ReadError> {
        let mut declarations = Vec::new();
        let mut statements = Vec::new();
        for node in nodes {
            match split_form(node) {
                Some(("var" | "array", _, _)) => declarations.push(self.declaration(node)?),
                _ => statements.push(node),
            }
        }
        let body = statements
            .into_iter()
            .map(|node| self.statement(node))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Program::new(declarations, body))
    }

    fn declaration(&mut self, node: &Node<'_>) -> Result<VarDecl, ReadError> {
        let pos = node.pos();
        let decl = match split_form(node) {
            Some(("var", [name, ty], _)) => VarDecl::scalar(name_of(name)?, type_of(ty)?),
            Some(("array", [name, ty, length], _)) => {
                VarDecl::array(name_of(name)?, type_of(ty)?, length_of(length)?)
            }
            Some(("var", _, _)) => return Err(arity(pos, "var", "a name and a type")),
            _ => return Err(arity(pos, "array", "a name, a type and a length")),
        };
        if self.variables.contains_key(&decl.name) {
            return Err(ReadError::DuplicateVariable { position: pos, name: decl.name });
        }
        self.variables.insert(decl.name.clone(), decl.clone());
        Ok(decl)
    }

    fn variable(&self, name: &str, pos: Position) -> Result<&VarDecl, ReadError> {
        self.variables
            .get(name)
            .ok_or_else(|| ReadError::UnknownVariable { position: pos, name: name.to_string() })
    }

    fn block(&self, nodes: &[Node<'_>]) -> Result<Vec<Stmt>, ReadError> {
        nodes.iter().map(|node| self.statement(node)).collect()
    }

    fn statement(&self, node: &Node<'_>) -> Result<Stmt, ReadError> {
        let pos = node.pos();
        let Some((head, args, _)) = split_form(node) else {
            return Err(ReadError::Unexpected {
                position: pos,
                found: format!("{} where a statement was expected", node.describe()),
            });
        };
        match head {
            "assign" => {
                let [target, value] = args else {
                    return Err(arity(pos, head, "a target and a value"));
                };
                let (target, ty) = self.lvalue(target)?;
                let value = self.expr(value)?.coerce(ty);
                Ok(Stmt::Assign { target, value })
            }
            "print" => Ok(Stmt::Print { values: self.exprs(args)? }),
            "if" => {
                let (condition, rest) = args
                    .split_first()
                    .ok_or_else(|| arity(pos, head, "a condition and a then block"))?;
                let condition = self.expr(condition)?;
                let (then_branch, else_branch) = match rest {
                    [then] => (self.branch(then, "then")?, Vec::new()),
                    [then, otherwise] => (self.branch(then, "then")?, self.branch(otherwise, "else")?),
                    _ => return Err(arity(pos, head, "a condition, a then block and an optional else block")),
                };
                Ok(Stmt::If { condition, then_branch, else_branch })
            }
            "while" => {
                let (condition, body) = args
                    .split_first()
                    .ok_or_else(|| arity(pos, head, "a condition and a body"))?;
                Ok(Stmt::While { condition: self.expr(condition)?, body: self.block(body)? })
            }
            "expr" => match args {
                [expr] => Ok(Stmt::Expr(self.expr(expr)?)),
                _ => Err(arity(pos, head, "one expression")),
            },
            _ => Ok(Stmt::Expr(self.expr(node)?)),
        }
    }

    fn branch(&self, node: &Node<'_>, keyword: &'static str) -> Result<Vec<Stmt>, ReadError> {
        match split_form(node) {
            Some((head, body, _)) if head == keyword => self.block(body),
            _ => Err(ReadError::Unexpected {
                position: node.pos(),
                found: format!("{} where a ({keyword} ...) block was expected", node.describe()),
            }),
        }
    }

    fn lvalue(&self, node: &Node<'_>) -> Result<(LValue, ValueType), ReadError> {
        if let Some(name) = node.atom() {
            let decl = self.variable(name, node.pos())?;
            return Ok((LValue::Variable(decl.name.clone()), decl.ty));
        }
        match split_form(node) {
            Some(("elem", [name, index], _)) => {
                let name = name_of(name)?;
                let ty = self.variable(name, node.pos())?.ty;
                let index = self.expr(index)?.coerce(ValueType::I64);
                Ok((LValue::Element { name: name.to_string(), index }, ty))
            }
            _ => Err(ReadError::Unexpected {
                position: node.pos(),
                found: format!("{} as an assignment target", node.describe()),
            }),
        }
    }

    fn exprs(&self, nodes: &[Node<'_>]) -> Result<Vec<Expr>, ReadError> {
        nodes.iter().map(|node| self.expr(node)).collect()
    }

    fn expr(&self, node: &Node<'_>) -> Result<Expr, ReadError> {
        let pos = node.pos();
        let expr = match node {
            Node::Str { value, .. } => Expr::string(value.clone()),
            Node::Atom { text, .. } => self.atom(text, pos)?,
            Node::List { .. } => self.form(node)?,
        };
        Ok(expr.at(pos))
    }

    fn atom(&self, text: &str, pos: Position) -> Result<Expr, ReadError> {
        match text {
            "true" => return Ok(Expr::boolean(true)),
            "false" => return Ok(Expr::boolean(false)),
            _ => {}
        }
        if looks_numeric(text) {
            let invalid = || ReadError::InvalidNumber { position: pos, text: text.to_string() };
            return if text.contains(['.', 'e', 'E']) || text.ends_with("inf") {
                text.parse::<f64>().map(Expr::float).map_err(|_| invalid())
            } else {
                text.parse::<i64>().map(Expr::int).map_err(|_| invalid())
            };
        }
        let decl = self.variable(text, pos)?;
        Ok(Expr::ident(decl.name.clone(), decl.ty))
    }

    fn form(&self, node: &Node<'_>) -> Result<Expr, ReadError> {
        let pos = node.pos();
        let Some((head, args, _)) = split_form(node) else {
            return Err(ReadError::Unexpected { position: pos, found: "empty list".to_string() });
        };
        let binary = |builder: &Self| -> Result<(Expr, Expr), ReadError> {
            match args {
                [left, right] => Ok((builder.expr(left)?, builder.expr(right)?)),
                _ => Err(arity(pos, head, "two operands")),
            }
        };
        let unary = |builder: &Self| -> Result<Expr, ReadError> {
            match args {
                [operand] => builder.expr(operand),
                _ => Err(arity(pos, head, "one operand")),
            }
        };

        let expr = match head {
            "+" | "-" | "*" | "/" | "%" => {
                let op = match head {
                    "+" => ArithOp::Add,
                    "-" => ArithOp::Sub,
                    "*" => ArithOp::Mul,
                    "/" => ArithOp::Div,
                    _ => ArithOp::Mod,
                };
                let (left, right) = binary(self)?;
                Expr::arith(op, left, right)
            }
            "=" | "<>" | "<" | "<=" | ">" | ">=" => {
                let op = match head {
                    "=" => RelOp::Eq,
                    "<>" => RelOp::Ne,
                    "<" => RelOp::Lt,
                    "<=" => RelOp::Le,
                    ">" => RelOp::Gt,
                    _ => RelOp::Ge,
                };
                let (left, right) = binary(self)?;
                Expr::relational(op, left, right)
            }
            "and" | "or" | "xor" => {
                let op = match head {
                    "and" => LogicalOp::And,
                    "or" => LogicalOp::Or,
                    _ => LogicalOp::Xor,
                };
                let (left, right) = binary(self)?;
                Expr::logical(op, left, right)
            }
            "neg" => Expr::unary(UnaryOp::Negate, unary(self)?),
            "not" => Expr::unary(UnaryOp::Not, unary(self)?),
            "elem" => match args {
                [name, index] => {
                    let name = name_of(name)?;
                    let ty = self.variable(name, pos)?.ty;
                    let index = self.expr(index)?.coerce(ValueType::I64);
                    Expr::element(name, ty, index)
                }
                _ => return Err(arity(pos, head, "an array name and an index")),
            },
            "cast" => match args {
                [ty, operand] => Expr::cast(type_of(ty)?, self.expr(operand)?),
                _ => return Err(arity(pos, head, "a type and an operand")),
            },
            "call" => {
                let (name, args) = args
                    .split_first()
                    .ok_or_else(|| arity(pos, head, "a function name"))?;
                let name = name_of(name)?;
                let args = self.exprs(args)?;
                let types: Vec<ValueType> = args.iter().map(|arg| arg.ty).collect();
                let function = self.library.resolve(name, &types).map_err(|_| {
                    ReadError::UnknownFunction { position: pos, signature: signature(name, &types) }
                })?;
                // Void functions only make sense as expression statements.
                let ty = function.value_type().unwrap_or(ValueType::I64);
                Expr::call(name, args, ty)
            }
            _ => return Err(ReadError::UnknownForm { position: pos, name: head.to_string() }),
        };
        Ok(expr)
    }
}

/// Head atom, arguments and position of a list whose first item is an atom.
fn split_form<'n, 'a>(node: &'n Node<'a>) -> Option<(&'a str, &'n [Node<'a>], Position)> {
    match node {
        Node::List { items, pos } => {
            let (head, args) = items.split_first()?;
            Some((head.atom()?, args, *pos))
        }
        _ => None,
    }
}

fn looks_numeric(text: &str) -> bool {
    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') || digits == "inf"
}

fn name_of<'a>(node: &Node<'a>) -> Result<&'a str, ReadError> {
    node.atom().ok_or_else(|| ReadError::Unexpected {
        position: node.pos(),
        found: format!("{} where a name was expected", node.describe()),
    })
}

fn type_of(node: &Node<'_>) -> Result<ValueType, ReadError> {
    let name = name_of(node)?;
    ValueType::from_name(name)
        .ok_or_else(|| ReadError::UnknownType { position: node.pos(), name: name.to_string() })
}

fn length_of(node: &Node<'_>) -> Result<usize, ReadError> {
    let text = name_of(node)?;
    text.parse().map_err(|_| ReadError::InvalidNumber { position: node.pos(), text: text.to_string() })
}

fn arity(position: Position, form: &str, expected: &'static str) -> ReadError {
    ReadError::Arity { position, form: form.to_string(), expected }
}
