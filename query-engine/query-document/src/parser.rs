use crate::{
    ast::*,
    error::{ParseError, ParseResult},
    lexer::{Token, TokenKind, tokenize},
};
use std::collections::HashMap;

/// Maximum number of fields in one operation, fragments included.
pub const MAX_FIELDS: usize = 1200;

/// Maximum number of arguments in one argument list.
pub const MAX_ARGS: usize = 25;

/// Parses a query document into its single operation.
///
/// Fragment definitions may appear before or after the operation. They are collected in a
/// first pass and inlined wherever they are spread, so the returned operation holds no
/// reference to them.
pub fn parse(input: &str) -> ParseResult<Operation<'_>> {
    let mut parser = Parser::new(input, false)?;

    let start = parser.scan_fragments()?;
    parser.pos = start;

    let op = parser.parse_operation()?;

    tracing::trace!(fields = op.fields.len(), nodes = op.nodes.len(), "parsed operation");

    Ok(op)
}

/// Parses a standalone argument value such as a role filter. With `json` set, object keys
/// may also be quoted strings.
pub fn parse_arg_value(input: &str, json: bool) -> ParseResult<ValueTree<'_>> {
    if input.trim().is_empty() {
        return Err(ParseError::EmptyValue);
    }

    let mut parser = Parser::new(input, json)?;
    let root = parser.parse_value()?;

    Ok(ValueTree {
        nodes: parser.nodes,
        root,
    })
}

struct Fragment<'a> {
    fields: Vec<Field<'a>>,
}

pub(crate) struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token<'a>>,
    pub(crate) pos: usize,
    json: bool,
    pub(crate) nodes: NodeArena<'a>,
    fragments: HashMap<&'a str, Fragment<'a>>,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(input: &'a str, json: bool) -> ParseResult<Self> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
            json,
            nodes: NodeArena::default(),
            fragments: HashMap::new(),
        })
    }

    /// First pass: parses every top-level `fragment` block and returns the token index where
    /// the operation starts.
    fn scan_fragments(&mut self) -> ParseResult<usize> {
        let mut op_start = None;
        let mut depth = 0usize;

        while !self.at(TokenKind::Eof) {
            let tok = self.current();

            if depth == 0 && tok.is_keyword("fragment") {
                self.pos += 1;
                self.parse_fragment()?;
                continue;
            }

            if op_start.is_none() && depth == 0 {
                let is_header = tok.kind == TokenKind::Name && OpKind::from_keyword(tok.value).is_some();

                if is_header || tok.kind == TokenKind::ObjOpen {
                    op_start = Some(self.pos);
                }
            }

            match tok.kind {
                TokenKind::ObjOpen => depth += 1,
                TokenKind::ObjClose => depth = depth.saturating_sub(1),
                _ => (),
            }

            self.pos += 1;
        }

        op_start.ok_or_else(|| self.unexpected("query, mutation or subscription"))
    }

    fn parse_fragment(&mut self) -> ParseResult<()> {
        let name = self.expect(TokenKind::Name, "fragment name")?.value;
        self.expect(TokenKind::On, "on")?;
        self.expect(TokenKind::Name, "table name after 'on' keyword")?;
        self.expect(TokenKind::ObjOpen, "{")?;

        let fields = self.parse_fields()?;
        self.eat(TokenKind::ObjClose);

        self.fragments.insert(name, Fragment { fields });

        Ok(())
    }

    fn parse_operation(&mut self) -> ParseResult<Operation<'a>> {
        let start = self.current().pos;

        let mut op = Operation {
            kind: OpKind::Query,
            name: "",
            var_defs: Vec::new(),
            directives: Vec::new(),
            fields: Vec::new(),
            nodes: NodeArena::default(),
            query: "",
        };

        let header = self.current();

        if header.kind == TokenKind::Name {
            match OpKind::from_keyword(header.value) {
                Some(kind) => op.kind = kind,
                None => return Err(self.unexpected("query, mutation or subscription")),
            }

            self.pos += 1;

            if self.at(TokenKind::Name) {
                op.name = self.next().value;
            }

            if self.eat(TokenKind::ArgsOpen) {
                op.var_defs = self.parse_var_defs()?;
            }

            op.directives = self.parse_directives()?;
        }

        self.expect(TokenKind::ObjOpen, "{")?;

        op.fields = self.parse_fields()?;

        let close = self.expect(TokenKind::ObjClose, "}")?;
        op.query = &self.input[start..close.pos + close.value.len()];

        for field in op.fields.iter_mut() {
            if field.parent_id.is_none() && field.args.is_empty() && field.children.is_empty() {
                field.kind = FieldKind::Keyword;
            }
        }

        op.nodes = std::mem::take(&mut self.nodes);

        Ok(op)
    }

    /// Parses a selection set body up to, but not including, its closing brace. Nesting is
    /// tracked with an explicit stack of parent field ids.
    fn parse_fields(&mut self) -> ParseResult<Vec<Field<'a>>> {
        let mut fields: Vec<Field<'a>> = Vec::new();
        let mut stack: Vec<FieldId> = Vec::new();

        if !self.at(TokenKind::Name) && !self.at(TokenKind::Spread) {
            return Err(self.unexpected("field name or ...Fragment"));
        }

        loop {
            if self.at(TokenKind::Eof) {
                return Err(ParseError::UnexpectedEof);
            }

            if self.at(TokenKind::ObjClose) {
                if stack.pop().is_none() {
                    break;
                }

                self.pos += 1;
                continue;
            }

            if fields.len() >= MAX_FIELDS {
                return Err(ParseError::TooManyFields { max: MAX_FIELDS });
            }

            if self.eat(TokenKind::Spread) {
                self.parse_spread(&mut stack, &mut fields)?;
            } else {
                self.parse_normal_field(&mut stack, &mut fields)?;
            }
        }

        if fields.len() > MAX_FIELDS {
            return Err(ParseError::TooManyFields { max: MAX_FIELDS });
        }

        Ok(fields)
    }

    fn parse_normal_field(&mut self, stack: &mut Vec<FieldId>, fields: &mut Vec<Field<'a>>) -> ParseResult<FieldId> {
        let name = self.expect(TokenKind::Name, "an alias or field name")?.value;

        let id = fields.len();
        let mut field = Field::new(id, name);

        if self.eat(TokenKind::Colon) {
            field.alias = Some(name);
            field.name = self.expect(TokenKind::Name, "an aliased field name")?.value;
        }

        if self.eat(TokenKind::ArgsOpen) {
            field.args = self.parse_args()?;
        }

        field.directives = self.parse_directives()?;

        if let Some(&parent_id) = stack.last() {
            field.parent_id = Some(parent_id);
            fields[parent_id].children.push(id);
        }

        fields.push(field);

        if self.eat(TokenKind::ObjOpen) {
            stack.push(id);
        }

        Ok(id)
    }

    fn parse_spread(&mut self, stack: &mut Vec<FieldId>, fields: &mut Vec<Field<'a>>) -> ParseResult<()> {
        let parent_id = stack.last().copied();

        if self.at(TokenKind::On) {
            let Some(parent_id) = parent_id else {
                return Err(self.unexpected("field name"));
            };

            self.pos += 1;
            fields[parent_id].kind = FieldKind::Union;

            let member_id = self.parse_normal_field(stack, fields)?;
            let args = fields[parent_id].args.clone();

            let member = &mut fields[member_id];
            member.kind = FieldKind::Member;
            member.args = args;

            return Ok(());
        }

        let name = self.expect(TokenKind::Name, "a fragment name")?.value;

        let fragment = self
            .fragments
            .get(name)
            .ok_or_else(|| ParseError::UndefinedFragment(name.to_owned()))?;

        let offset = fields.len();

        for f in fragment.fields.iter() {
            let mut field = f.clone();
            field.id += offset;

            match field.parent_id {
                Some(pid) => field.parent_id = Some(pid + offset),
                None => {
                    if let Some(pid) = parent_id {
                        field.parent_id = Some(pid);
                        fields[pid].children.push(field.id);
                    }
                }
            }

            for child in field.children.iter_mut() {
                *child += offset;
            }

            fields.push(field);
        }

        Ok(())
    }

    fn parse_var_defs(&mut self) -> ParseResult<Vec<VarDef<'a>>> {
        let mut var_defs = Vec::new();

        loop {
            match self.current().kind {
                TokenKind::ArgsClose => {
                    self.pos += 1;
                    break;
                }
                TokenKind::Eof => return Err(ParseError::UnexpectedEof),
                TokenKind::Variable => {
                    if var_defs.len() >= MAX_ARGS {
                        return Err(ParseError::TooManyVariables { max: MAX_ARGS });
                    }

                    let name = self.next().value;

                    // Skip the type annotation.
                    while !self.at_any(&[TokenKind::Equals, TokenKind::Variable, TokenKind::ArgsClose, TokenKind::Eof]) {
                        self.pos += 1;
                    }

                    let default = if self.eat(TokenKind::Equals) {
                        Some(self.parse_value()?)
                    } else {
                        None
                    };

                    var_defs.push(VarDef { name, default });
                }
                _ => self.pos += 1,
            }
        }

        Ok(var_defs)
    }

    pub(crate) fn parse_args(&mut self) -> ParseResult<Vec<Arg<'a>>> {
        let mut args = Vec::new();

        loop {
            if self.eat(TokenKind::ArgsClose) {
                break;
            }

            if self.at(TokenKind::Eof) {
                return Err(ParseError::UnexpectedEof);
            }

            if args.len() >= MAX_ARGS {
                return Err(ParseError::TooManyArgs { max: MAX_ARGS });
            }

            let name = self.parse_label("argument name")?;
            self.expect(TokenKind::Colon, ":")?;
            let value = self.parse_value()?;

            args.push(Arg { name, value });
        }

        Ok(args)
    }

    pub(crate) fn parse_directives(&mut self) -> ParseResult<Vec<Directive<'a>>> {
        let mut directives = Vec::new();

        while self.eat(TokenKind::Directive) {
            let name = self.expect(TokenKind::Name, "directive name after @ symbol")?.value;

            let args = if self.eat(TokenKind::ArgsOpen) {
                self.parse_args()?
            } else {
                Vec::new()
            };

            directives.push(Directive { name, args });
        }

        Ok(directives)
    }

    /// Parses one value. Objects and lists are built with an explicit stack of open
    /// containers so nesting depth is bounded by memory, not by the call stack.
    pub(crate) fn parse_value(&mut self) -> ParseResult<NodeId> {
        let mut open: Vec<NodeId> = Vec::new();

        loop {
            let mut name = "";

            if let Some(&top) = open.last() {
                let container = self.nodes.get(top).kind;

                let close = match container {
                    NodeKind::List => TokenKind::ListClose,
                    _ => TokenKind::ObjClose,
                };

                if self.eat(close) {
                    open.pop();

                    if open.is_empty() {
                        return Ok(top);
                    }

                    continue;
                }

                if self.at(TokenKind::Eof) {
                    return Err(ParseError::UnexpectedEof);
                }

                if container == NodeKind::Obj {
                    name = self.parse_label("a label")?;
                    self.expect(TokenKind::Colon, ":")?;
                }
            }

            let tok = self.next();

            let kind = match tok.kind {
                TokenKind::ListOpen => NodeKind::List,
                TokenKind::ObjOpen => NodeKind::Obj,
                TokenKind::Number => NodeKind::Num,
                TokenKind::String => NodeKind::Str,
                TokenKind::Bool => NodeKind::Bool,
                TokenKind::Variable => NodeKind::Var,
                TokenKind::Name => NodeKind::Label,
                _ => return Err(unexpected_token(tok, "a number, string, object, list or variable")),
            };

            let is_container = matches!(kind, NodeKind::List | NodeKind::Obj);
            let parent = open.last().copied();

            let id = self.nodes.alloc(Node {
                kind,
                name,
                value: if is_container { "" } else { tok.value },
                parent,
                children: Vec::new(),
            });

            if let Some(parent) = parent {
                self.nodes.get_mut(parent).children.push(id);
            }

            if is_container {
                open.push(id);
            } else if parent.is_none() {
                return Ok(id);
            }
        }
    }

    fn parse_label(&mut self, expected: &'static str) -> ParseResult<&'a str> {
        let tok = self.current();

        match tok.kind {
            TokenKind::Name => Ok(self.next().value),
            TokenKind::String if self.json => Ok(self.next().value),
            _ => Err(self.unexpected(expected)),
        }
    }

    pub(crate) fn current(&self) -> Token<'a> {
        let last = self.tokens.len() - 1;
        self.tokens[self.pos.min(last)]
    }

    pub(crate) fn next(&mut self) -> Token<'a> {
        let tok = self.current();

        if tok.kind != TokenKind::Eof {
            self.pos += 1;
        }

        tok
    }

    pub(crate) fn at(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn at_any(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.current().kind)
    }

    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, kind: TokenKind, expected: &'static str) -> ParseResult<Token<'a>> {
        if self.at(kind) {
            Ok(self.next())
        } else {
            Err(self.unexpected(expected))
        }
    }

    pub(crate) fn unexpected(&self, expected: &'static str) -> ParseError {
        unexpected_token(self.current(), expected)
    }
}

fn unexpected_token(tok: Token<'_>, expected: &'static str) -> ParseError {
    let found = match tok.kind {
        TokenKind::Eof => "EOF".to_owned(),
        _ => tok.value.to_owned(),
    };

    ParseError::UnexpectedToken {
        found,
        expected,
        line: tok.line,
        pos: tok.pos,
    }
}
