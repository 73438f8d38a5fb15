//! XPath 1.0 evaluation over parsed HTML documents.
//!
//! Covers location paths with the full set of tree axes, node tests,
//! predicates, boolean/comparison/additive operators, unions, filter
//! expressions and the core string/number/boolean functions. Namespaces,
//! variables and the `id()`/`lang()` family are not supported and report
//! [`XPathError::Unsupported`] or [`XPathError::UnknownFunction`].
//!
//! Element names are matched case-insensitively because HTML tag names are
//! stored lowercase while locators may be written in any case.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum XPathError {
    #[error("syntax error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },
    #[error("unsupported construct: {0}")]
    Unsupported(String),
    #[error("expression does not evaluate to a node-set")]
    NotANodeSet,
    #[error("unknown function {0}()")]
    UnknownFunction(String),
    #[error("{name}() takes {expected} argument(s)")]
    Arity { name: String, expected: &'static str },
}

pub type XPathResult<T> = Result<T, XPathError>;

// ── Tokens ──

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    ColonColon,
    Dot,
    DotDot,
    Star,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Dollar,
    Name(String),
    Literal(String),
    Number(f64),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn tokenize(input: &str) -> XPathResult<Vec<(usize, Token)>> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, n)| n);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let two = |t: Token| (t, 2);
        let one = |t: Token| (t, 1);
        let simple = match (c, next) {
            ('/', Some('/')) => Some(two(Token::DoubleSlash)),
            ('/', _) => Some(one(Token::Slash)),
            (':', Some(':')) => Some(two(Token::ColonColon)),
            ('!', Some('=')) => Some(two(Token::NotEq)),
            ('<', Some('=')) => Some(two(Token::Le)),
            ('<', _) => Some(one(Token::Lt)),
            ('>', Some('=')) => Some(two(Token::Ge)),
            ('>', _) => Some(one(Token::Gt)),
            ('.', Some('.')) => Some(two(Token::DotDot)),
            ('.', n) if !n.is_some_and(|n| n.is_ascii_digit()) => Some(one(Token::Dot)),
            ('[', _) => Some(one(Token::LBracket)),
            (']', _) => Some(one(Token::RBracket)),
            ('(', _) => Some(one(Token::LParen)),
            (')', _) => Some(one(Token::RParen)),
            ('@', _) => Some(one(Token::At)),
            (',', _) => Some(one(Token::Comma)),
            ('*', _) => Some(one(Token::Star)),
            ('|', _) => Some(one(Token::Pipe)),
            ('+', _) => Some(one(Token::Plus)),
            ('-', _) => Some(one(Token::Minus)),
            ('=', _) => Some(one(Token::Eq)),
            ('$', _) => Some(one(Token::Dollar)),
            _ => None,
        };
        if let Some((token, width)) = simple {
            tokens.push((pos, token));
            i += width;
            continue;
        }

        if c == '\'' || c == '"' {
            let close = chars[i + 1..]
                .iter()
                .position(|&(_, q)| q == c)
                .ok_or_else(|| XPathError::Parse {
                    pos,
                    message: "unterminated string literal".into(),
                })?;
            let text: String = chars[i + 1..i + 1 + close].iter().map(|&(_, ch)| ch).collect();
            tokens.push((pos, Token::Literal(text)));
            i += close + 2;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            let raw: String = chars[start..i].iter().map(|&(_, ch)| ch).collect();
            let value = raw.parse::<f64>().map_err(|_| XPathError::Parse {
                pos,
                message: format!("invalid number '{raw}'"),
            })?;
            tokens.push((pos, Token::Number(value)));
            continue;
        }

        if is_name_start(c) {
            let start = i;
            while i < chars.len() && is_name_char(chars[i].1) {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|&(_, ch)| ch).collect();
            tokens.push((pos, Token::Name(name)));
            continue;
        }

        return Err(XPathError::Parse {
            pos,
            message: format!("unexpected character '{c}'"),
        });
    }

    Ok(tokens)
}

// ── Syntax tree ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    Following,
    FollowingSibling,
    Preceding,
    PrecedingSibling,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfAxis,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following" => Self::Following,
            "following-sibling" => Self::FollowingSibling,
            "preceding" => Self::Preceding,
            "preceding-sibling" => Self::PrecedingSibling,
            "attribute" => Self::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    Any,
    Node,
    Text,
    Comment,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
    Path { absolute: bool, steps: Vec<Step> },
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
}

// ── Parser ──

/// Deepest expression tree the parser builds. Evaluation recurses over the
/// tree, so this also bounds evaluator stack use.
const MAX_NESTING: usize = 64;

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.end)
    }

    fn error(&self, message: impl Into<String>) -> XPathError {
        XPathError::Parse {
            pos: self.offset(),
            message: message.into(),
        }
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(n)) if n == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> XPathResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    /// One level deeper in the expression tree.
    fn descend(&mut self) -> XPathResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    /// Run `parse` and restore the nesting depth afterwards, so siblings
    /// do not accumulate each other's depth.
    fn scoped(&mut self, parse: impl FnOnce(&mut Self) -> XPathResult<Expr>) -> XPathResult<Expr> {
        let outer = self.depth;
        let result = parse(self);
        self.depth = outer;
        result
    }

    fn parse_expr(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            p.descend()?;
            p.parse_or()
        })
    }

    fn parse_or(&mut self) -> XPathResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            self.descend()?;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut lhs = p.parse_equality()?;
            while p.eat_keyword("and") {
                p.descend()?;
                let rhs = p.parse_equality()?;
                lhs = Expr::And(Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    fn parse_equality(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut lhs = p.parse_relational()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Eq) => CmpOp::Eq,
                    Some(Token::NotEq) => CmpOp::Ne,
                    _ => return Ok(lhs),
                };
                p.pos += 1;
                p.descend()?;
                let rhs = p.parse_relational()?;
                lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
            }
        })
    }

    fn parse_relational(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut lhs = p.parse_additive()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Lt) => CmpOp::Lt,
                    Some(Token::Le) => CmpOp::Le,
                    Some(Token::Gt) => CmpOp::Gt,
                    Some(Token::Ge) => CmpOp::Ge,
                    _ => return Ok(lhs),
                };
                p.pos += 1;
                p.descend()?;
                let rhs = p.parse_additive()?;
                lhs = Expr::Compare(op, Box::new(lhs), Box::new(rhs));
            }
        })
    }

    fn parse_additive(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut lhs = p.parse_multiplicative()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Plus) => ArithOp::Add,
                    Some(Token::Minus) => ArithOp::Sub,
                    _ => return Ok(lhs),
                };
                p.pos += 1;
                p.descend()?;
                let rhs = p.parse_multiplicative()?;
                lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
            }
        })
    }

    fn parse_multiplicative(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut lhs = p.parse_unary()?;
            loop {
                let op = match p.peek() {
                    Some(Token::Star) => ArithOp::Mul,
                    Some(Token::Name(n)) if n == "div" => ArithOp::Div,
                    Some(Token::Name(n)) if n == "mod" => ArithOp::Mod,
                    _ => return Ok(lhs),
                };
                p.pos += 1;
                p.descend()?;
                let rhs = p.parse_unary()?;
                lhs = Expr::Arith(op, Box::new(lhs), Box::new(rhs));
            }
        })
    }

    fn parse_unary(&mut self) -> XPathResult<Expr> {
        self.scoped(|p| {
            let mut negations = 0;
            while p.eat(&Token::Minus) {
                p.descend()?;
                negations += 1;
            }
            let mut expr = p.parse_path_expr()?;
            while p.eat(&Token::Pipe) {
                p.descend()?;
                let rhs = p.parse_path_expr()?;
                expr = Expr::Union(Box::new(expr), Box::new(rhs));
            }
            for _ in 0..negations {
                expr = Expr::Negate(Box::new(expr));
            }
            Ok(expr)
        })
    }

    fn parse_path_expr(&mut self) -> XPathResult<Expr> {
        match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                let mut steps = Vec::new();
                if self.can_start_step() {
                    self.parse_relative_steps(&mut steps)?;
                }
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                let mut steps = vec![Step::descendant_or_self()];
                self.parse_relative_steps(&mut steps)?;
                Ok(Expr::Path {
                    absolute: true,
                    steps,
                })
            }
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::LParen) => {
                self.parse_filter_expr()
            }
            Some(Token::Dollar) => Err(XPathError::Unsupported("variable references".into())),
            Some(Token::Name(n))
                if self.peek_at(1) == Some(&Token::LParen) && !is_node_type(n) =>
            {
                self.parse_filter_expr()
            }
            _ => {
                let mut steps = Vec::new();
                self.parse_relative_steps(&mut steps)?;
                Ok(Expr::Path {
                    absolute: false,
                    steps,
                })
            }
        }
    }

    fn parse_filter_expr(&mut self) -> XPathResult<Expr> {
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;
        let mut steps = Vec::new();
        if self.eat(&Token::Slash) {
            self.parse_relative_steps(&mut steps)?;
        } else if self.eat(&Token::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            self.parse_relative_steps(&mut steps)?;
        }
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> XPathResult<Expr> {
        match self.advance() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s)),
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        self.expect(Token::RParen)?;
                        break;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            other => {
                if other.is_some() {
                    self.pos -= 1;
                }
                Err(self.error("expected an expression"))
            }
        }
    }

    fn can_start_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_relative_steps(&mut self, steps: &mut Vec<Step>) -> XPathResult<()> {
        loop {
            steps.push(self.parse_step()?);
            if self.eat(&Token::Slash) {
                continue;
            }
            if self.eat(&Token::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                continue;
            }
            return Ok(());
        }
    }

    fn parse_step(&mut self) -> XPathResult<Step> {
        if self.eat(&Token::Dot) {
            return Ok(Step {
                axis: Axis::SelfAxis,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step {
                axis: Axis::Parent,
                test: NodeTest::Node,
                predicates: Vec::new(),
            });
        }

        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let (Some(Token::Name(name)), Some(Token::ColonColon)) =
            (self.peek(), self.peek_at(1))
        {
            let axis = match Axis::from_name(name) {
                Some(axis) => axis,
                None if name == "namespace" => {
                    return Err(XPathError::Unsupported("namespace axis".into()))
                }
                None => return Err(self.error(format!("unknown axis '{name}'"))),
            };
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = self.parse_node_test()?;
        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_node_test(&mut self) -> XPathResult<NodeTest> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::Any),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) && is_node_type(&name) {
                    self.pos += 1;
                    if name == "processing-instruction" {
                        return Err(XPathError::Unsupported(
                            "processing-instruction() node test".into(),
                        ));
                    }
                    self.expect(Token::RParen)?;
                    return Ok(match name.as_str() {
                        "text" => NodeTest::Text,
                        "comment" => NodeTest::Comment,
                        _ => NodeTest::Node,
                    });
                }
                if self.peek() == Some(&Token::ColonColon) {
                    return Err(self.error("unexpected '::'"));
                }
                Ok(NodeTest::Name(name.to_ascii_lowercase()))
            }
            other => {
                if other.is_some() {
                    self.pos -= 1;
                }
                Err(self.error("expected a node test"))
            }
        }
    }

    fn parse_predicates(&mut self) -> XPathResult<Vec<Expr>> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "node" | "text" | "comment" | "processing-instruction")
}

// ── Evaluation ──

/// A node-set member: a tree node, or an element attribute by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Item {
    Node(NodeId),
    Attr(NodeId, usize),
}

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<Item>),
    Str(String),
    Num(f64),
    Bool(bool),
}

struct Context {
    item: Item,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Html,
    order: HashMap<NodeId, usize>,
}

/// XPath whitespace is space, tab, CR and LF only.
fn xpath_normalize(s: &str) -> String {
    s.split([' ', '\t', '\r', '\n'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{sign}Infinity")
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse::<f64>().unwrap_or(f64::NAN)
}

impl<'a> Evaluator<'a> {
    fn new(doc: &'a Html) -> Self {
        let order = doc
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        Self { doc, order }
    }

    fn root(&self) -> Item {
        Item::Node(self.doc.tree.root().id())
    }

    fn node(&self, id: NodeId) -> Option<NodeRef<'a, Node>> {
        self.doc.tree.get(id)
    }

    fn attr_at(&self, id: NodeId, idx: usize) -> Option<(&'a str, &'a str)> {
        self.node(id)?.value().as_element()?.attrs().nth(idx)
    }

    fn sort_key(&self, item: Item) -> (usize, usize) {
        match item {
            Item::Node(id) => (self.order.get(&id).copied().unwrap_or(usize::MAX), 0),
            Item::Attr(id, idx) => (self.order.get(&id).copied().unwrap_or(usize::MAX), idx + 1),
        }
    }

    fn in_document_order(&self, mut items: Vec<Item>) -> Vec<Item> {
        items.sort_by_key(|&item| self.sort_key(item));
        items.dedup();
        items
    }

    fn string_value(&self, item: Item) -> String {
        match item {
            Item::Node(id) => {
                let Some(node) = self.node(id) else {
                    return String::new();
                };
                match node.value() {
                    Node::Text(text) => (**text).to_string(),
                    Node::Comment(comment) => (**comment).to_string(),
                    _ => node
                        .descendants()
                        .filter_map(|d| d.value().as_text())
                        .map(|t| &**t)
                        .collect(),
                }
            }
            Item::Attr(id, idx) => self
                .attr_at(id, idx)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default(),
        }
    }

    fn item_name(&self, item: Item) -> String {
        match item {
            Item::Node(id) => self
                .node(id)
                .and_then(|n| n.value().as_element().map(|e| e.name().to_string()))
                .unwrap_or_default(),
            Item::Attr(id, idx) => self
                .attr_at(id, idx)
                .map(|(name, _)| name.to_string())
                .unwrap_or_default(),
        }
    }

    fn axis_items(&self, item: Item, axis: Axis) -> Vec<Item> {
        let id = match item {
            Item::Node(id) => id,
            Item::Attr(owner, _) => {
                return match axis {
                    Axis::SelfAxis => vec![item],
                    Axis::Parent => vec![Item::Node(owner)],
                    Axis::Ancestor | Axis::AncestorOrSelf => {
                        let mut out = Vec::new();
                        if axis == Axis::AncestorOrSelf {
                            out.push(item);
                        }
                        out.push(Item::Node(owner));
                        out.extend(self.axis_items(Item::Node(owner), Axis::Ancestor));
                        out
                    }
                    _ => Vec::new(),
                };
            }
        };
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        let wrap = |n: NodeRef<'a, Node>| Item::Node(n.id());

        match axis {
            Axis::Child => node.children().map(wrap).collect(),
            Axis::Descendant => node.descendants().skip(1).map(wrap).collect(),
            Axis::DescendantOrSelf => node.descendants().map(wrap).collect(),
            Axis::SelfAxis => vec![item],
            Axis::Parent => node.parent().map(wrap).into_iter().collect(),
            Axis::Ancestor => node.ancestors().map(wrap).collect(),
            Axis::AncestorOrSelf => std::iter::once(node)
                .chain(node.ancestors())
                .map(wrap)
                .collect(),
            Axis::FollowingSibling => node.next_siblings().map(wrap).collect(),
            Axis::PrecedingSibling => node.prev_siblings().map(wrap).collect(),
            Axis::Following => std::iter::once(node)
                .chain(node.ancestors())
                .flat_map(|n| n.next_siblings())
                .flat_map(|sibling| sibling.descendants())
                .map(wrap)
                .collect(),
            Axis::Preceding => {
                let mut out = Vec::new();
                for n in std::iter::once(node).chain(node.ancestors()) {
                    for sibling in n.prev_siblings() {
                        let mut subtree: Vec<Item> = sibling.descendants().map(wrap).collect();
                        subtree.reverse();
                        out.extend(subtree);
                    }
                }
                out
            }
            Axis::Attribute => match node.value().as_element() {
                Some(el) => (0..el.attrs().count()).map(|i| Item::Attr(id, i)).collect(),
                None => Vec::new(),
            },
        }
    }

    fn matches_test(&self, item: Item, test: &NodeTest) -> bool {
        match item {
            Item::Attr(id, idx) => match test {
                NodeTest::Any | NodeTest::Node => true,
                NodeTest::Name(name) => self
                    .attr_at(id, idx)
                    .is_some_and(|(attr, _)| attr.eq_ignore_ascii_case(name)),
                NodeTest::Text | NodeTest::Comment => false,
            },
            Item::Node(id) => {
                let Some(node) = self.node(id) else {
                    return false;
                };
                match test {
                    NodeTest::Node => true,
                    NodeTest::Text => node.value().is_text(),
                    NodeTest::Comment => node.value().is_comment(),
                    NodeTest::Any => node.value().is_element(),
                    NodeTest::Name(name) => node
                        .value()
                        .as_element()
                        .is_some_and(|el| el.name().eq_ignore_ascii_case(name)),
                }
            }
        }
    }

    fn eval_steps(&self, mut items: Vec<Item>, steps: &[Step]) -> XPathResult<Vec<Item>> {
        for step in steps {
            let mut out = Vec::new();
            for &item in &items {
                let mut candidates: Vec<Item> = self
                    .axis_items(item, step.axis)
                    .into_iter()
                    .filter(|&c| self.matches_test(c, &step.test))
                    .collect();
                for predicate in &step.predicates {
                    candidates = self.apply_predicate(candidates, predicate)?;
                }
                out.extend(candidates);
            }
            items = self.in_document_order(out);
        }
        Ok(items)
    }

    fn apply_predicate(&self, items: Vec<Item>, predicate: &Expr) -> XPathResult<Vec<Item>> {
        let size = items.len();
        let mut kept = Vec::with_capacity(size);
        for (i, item) in items.into_iter().enumerate() {
            let ctx = Context {
                item,
                position: i + 1,
                size,
            };
            let keep = match self.eval(predicate, &ctx)? {
                Value::Num(n) => n == (i + 1) as f64,
                other => self.boolean(&other),
            };
            if keep {
                kept.push(item);
            }
        }
        Ok(kept)
    }

    fn eval(&self, expr: &Expr, ctx: &Context) -> XPathResult<Value> {
        match expr {
            Expr::Or(lhs, rhs) => {
                let l = self.eval(lhs, ctx)?;
                if self.boolean(&l) {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval(rhs, ctx)?;
                Ok(Value::Bool(self.boolean(&r)))
            }
            Expr::And(lhs, rhs) => {
                let l = self.eval(lhs, ctx)?;
                if !self.boolean(&l) {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval(rhs, ctx)?;
                Ok(Value::Bool(self.boolean(&r)))
            }
            Expr::Compare(op, lhs, rhs) => {
                let l = self.eval(lhs, ctx)?;
                let r = self.eval(rhs, ctx)?;
                Ok(Value::Bool(self.compare(*op, &l, &r)))
            }
            Expr::Arith(op, lhs, rhs) => {
                let l = self.number(&self.eval(lhs, ctx)?);
                let r = self.number(&self.eval(rhs, ctx)?);
                Ok(Value::Num(match op {
                    ArithOp::Add => l + r,
                    ArithOp::Sub => l - r,
                    ArithOp::Mul => l * r,
                    ArithOp::Div => l / r,
                    ArithOp::Mod => l % r,
                }))
            }
            Expr::Negate(inner) => Ok(Value::Num(-self.number(&self.eval(inner, ctx)?))),
            Expr::Union(lhs, rhs) => {
                let (Value::Nodes(mut l), Value::Nodes(r)) =
                    (self.eval(lhs, ctx)?, self.eval(rhs, ctx)?)
                else {
                    return Err(XPathError::NotANodeSet);
                };
                l.extend(r);
                Ok(Value::Nodes(self.in_document_order(l)))
            }
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Call(name, args) => self.call(name, args, ctx),
            Expr::Path { absolute, steps } => {
                let start = if *absolute { self.root() } else { ctx.item };
                Ok(Value::Nodes(self.eval_steps(vec![start], steps)?))
            }
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let Value::Nodes(items) = self.eval(primary, ctx)? else {
                    return Err(XPathError::NotANodeSet);
                };
                let mut items = self.in_document_order(items);
                for predicate in predicates {
                    items = self.apply_predicate(items, predicate)?;
                }
                Ok(Value::Nodes(self.eval_steps(items, steps)?))
            }
        }
    }

    fn string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(items) => items
                .first()
                .map(|&i| self.string_value(i))
                .unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => number_to_string(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => parse_number(&self.string(other)),
        }
    }

    fn boolean(&self, value: &Value) -> bool {
        match value {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    /// Compare two non-node-set values.
    fn compare_atoms(&self, op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
        match op {
            CmpOp::Eq | CmpOp::Ne => {
                let equal = if matches!(lhs, Value::Bool(_)) || matches!(rhs, Value::Bool(_)) {
                    self.boolean(lhs) == self.boolean(rhs)
                } else if matches!(lhs, Value::Num(_)) || matches!(rhs, Value::Num(_)) {
                    self.number(lhs) == self.number(rhs)
                } else {
                    self.string(lhs) == self.string(rhs)
                };
                equal == (op == CmpOp::Eq)
            }
            CmpOp::Lt => self.number(lhs) < self.number(rhs),
            CmpOp::Le => self.number(lhs) <= self.number(rhs),
            CmpOp::Gt => self.number(lhs) > self.number(rhs),
            CmpOp::Ge => self.number(lhs) >= self.number(rhs),
        }
    }

    /// A node's value converted to the type of the value it is compared with.
    fn atom_for(&self, item: Item, other: &Value) -> Value {
        let s = self.string_value(item);
        match other {
            Value::Num(_) => Value::Num(parse_number(&s)),
            _ => Value::Str(s),
        }
    }

    fn compare(&self, op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
        match (lhs, rhs) {
            (Value::Nodes(l), Value::Nodes(r)) => {
                let right: Vec<Value> = r.iter().map(|&i| Value::Str(self.string_value(i))).collect();
                l.iter().any(|&i| {
                    let left = Value::Str(self.string_value(i));
                    right.iter().any(|rv| self.compare_atoms(op, &left, rv))
                })
            }
            (Value::Nodes(l), Value::Bool(_)) => {
                self.compare_atoms(op, &Value::Bool(!l.is_empty()), rhs)
            }
            (Value::Bool(_), Value::Nodes(r)) => {
                self.compare_atoms(op, lhs, &Value::Bool(!r.is_empty()))
            }
            (Value::Nodes(l), other) => l
                .iter()
                .any(|&i| self.compare_atoms(op, &self.atom_for(i, other), other)),
            (other, Value::Nodes(r)) => r
                .iter()
                .any(|&i| self.compare_atoms(op, other, &self.atom_for(i, other))),
            _ => self.compare_atoms(op, lhs, rhs),
        }
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Context) -> XPathResult<Value> {
        let arity = |expected: &'static str, ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(XPathError::Arity {
                    name: name.to_string(),
                    expected,
                })
            }
        };
        // Value of the single optional argument, or the context node.
        let arg_or_context = |args: &[Expr]| -> XPathResult<Value> {
            match args.first() {
                Some(arg) => self.eval(arg, ctx),
                None => Ok(Value::Nodes(vec![ctx.item])),
            }
        };

        match name {
            "last" => {
                arity("0", args.is_empty())?;
                Ok(Value::Num(ctx.size as f64))
            }
            "position" => {
                arity("0", args.is_empty())?;
                Ok(Value::Num(ctx.position as f64))
            }
            "count" => {
                arity("1", args.len() == 1)?;
                match self.eval(&args[0], ctx)? {
                    Value::Nodes(items) => Ok(Value::Num(items.len() as f64)),
                    _ => Err(XPathError::NotANodeSet),
                }
            }
            "string" => {
                arity("0 or 1", args.len() <= 1)?;
                Ok(Value::Str(self.string(&arg_or_context(args)?)))
            }
            "concat" => {
                arity("at least 2", args.len() >= 2)?;
                let mut out = String::new();
                for arg in args {
                    out.push_str(&self.string(&self.eval(arg, ctx)?));
                }
                Ok(Value::Str(out))
            }
            "contains" | "starts-with" => {
                arity("2", args.len() == 2)?;
                let haystack = self.string(&self.eval(&args[0], ctx)?);
                let needle = self.string(&self.eval(&args[1], ctx)?);
                Ok(Value::Bool(if name == "contains" {
                    haystack.contains(&needle)
                } else {
                    haystack.starts_with(&needle)
                }))
            }
            "normalize-space" => {
                arity("0 or 1", args.len() <= 1)?;
                Ok(Value::Str(xpath_normalize(&self.string(&arg_or_context(args)?))))
            }
            "string-length" => {
                arity("0 or 1", args.len() <= 1)?;
                let s = self.string(&arg_or_context(args)?);
                Ok(Value::Num(s.chars().count() as f64))
            }
            "not" => {
                arity("1", args.len() == 1)?;
                Ok(Value::Bool(!self.boolean(&self.eval(&args[0], ctx)?)))
            }
            "boolean" => {
                arity("1", args.len() == 1)?;
                Ok(Value::Bool(self.boolean(&self.eval(&args[0], ctx)?)))
            }
            "true" | "false" => {
                arity("0", args.is_empty())?;
                Ok(Value::Bool(name == "true"))
            }
            "number" => {
                arity("0 or 1", args.len() <= 1)?;
                Ok(Value::Num(self.number(&arg_or_context(args)?)))
            }
            "name" | "local-name" => {
                arity("0 or 1", args.len() <= 1)?;
                match arg_or_context(args)? {
                    Value::Nodes(items) => Ok(Value::Str(
                        items.first().map(|&i| self.item_name(i)).unwrap_or_default(),
                    )),
                    _ => Err(XPathError::NotANodeSet),
                }
            }
            other => Err(XPathError::UnknownFunction(other.to_string())),
        }
    }
}

// ── Public API ──

/// A compiled XPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct XPath {
    source: String,
    expr: Expr,
}

/// One member of a selected node-set.
#[derive(Debug, Clone)]
pub enum Match<'a> {
    Node(NodeRef<'a, Node>),
    Attribute { name: &'a str, value: &'a str },
}

impl Match<'_> {
    /// Short human-readable rendering for listings.
    pub fn describe(&self) -> String {
        match self {
            Match::Attribute { name, value } => format!("@{name}=\"{value}\""),
            Match::Node(node) => match node.value() {
                Node::Element(_) => ElementRef::wrap(*node)
                    .map(|el| {
                        let text = xpath_normalize(&el.text().collect::<String>());
                        let mut out = format!("<{}", el.value().name());
                        for (k, v) in el.value().attrs() {
                            out.push_str(&format!(" {k}=\"{v}\""));
                        }
                        out.push('>');
                        if !text.is_empty() {
                            out.push(' ');
                            out.push_str(&truncate(&text, 60));
                        }
                        out
                    })
                    .unwrap_or_default(),
                Node::Text(text) => format!("text \"{}\"", truncate(&xpath_normalize(text), 60)),
                Node::Comment(comment) => format!("comment \"{}\"", truncate(comment, 60)),
                Node::Document => "(document)".into(),
                _ => "(node)".into(),
            },
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}...")
    }
}

impl XPath {
    pub fn parse(source: &str) -> XPathResult<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(XPathError::Parse {
                pos: 0,
                message: "empty expression".into(),
            });
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
            depth: 0,
        };
        let expr = parser.parse_expr()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn evaluate_items(&self, eval: &Evaluator<'_>) -> XPathResult<Vec<Item>> {
        let ctx = Context {
            item: eval.root(),
            position: 1,
            size: 1,
        };
        match eval.eval(&self.expr, &ctx)? {
            Value::Nodes(items) => Ok(items),
            _ => Err(XPathError::NotANodeSet),
        }
    }

    /// Matched nodes in document order.
    pub fn select<'a>(&self, doc: &'a Html) -> XPathResult<Vec<Match<'a>>> {
        let eval = Evaluator::new(doc);
        let items = self.evaluate_items(&eval)?;
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Item::Node(id) => eval.node(id).map(Match::Node),
                Item::Attr(id, idx) => eval
                    .attr_at(id, idx)
                    .map(|(name, value)| Match::Attribute { name, value }),
            })
            .collect())
    }

    /// Size of the matched node-set.
    pub fn count(&self, doc: &Html) -> XPathResult<usize> {
        let eval = Evaluator::new(doc);
        Ok(self.evaluate_items(&eval)?.len())
    }
}

impl FromStr for XPath {
    type Err = XPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for XPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

pub fn count(doc: &Html, expr: &str) -> XPathResult<usize> {
    XPath::parse(expr)?.count(doc)
}

pub fn select<'a>(doc: &'a Html, expr: &str) -> XPathResult<Vec<Match<'a>>> {
    XPath::parse(expr)?.select(doc)
}

/// Parse `html` and count what `expr` selects in it.
pub fn count_in_html(html: &str, expr: &str) -> XPathResult<usize> {
    let xpath = XPath::parse(expr)?;
    xpath.count(&Html::parse_document(html))
}
