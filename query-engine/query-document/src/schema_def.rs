//! The schema-definition language used to describe synthetic tables and functions:
//!
//! ```text
//! # dbinfo:postgres,140000,public
//! type Products @schema(name: "shop") {
//!   id: Bigint! @id
//!   tags: [Text]
//!   user_id: Bigint @relation(type: "users", field: "id")
//! }
//! ```

use crate::{
    ast::{Directive, NodeArena},
    error::{ParseError, ParseResult},
    lexer::TokenKind,
    parser::Parser,
};

const DB_INFO_PREFIX: &str = "# dbinfo:";

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDocument<'a> {
    pub db_type: &'a str,
    pub version: &'a str,
    pub schema: &'a str,
    pub types: Vec<TypeDef<'a>>,
    pub nodes: NodeArena<'a>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef<'a> {
    pub name: &'a str,
    pub directives: Vec<Directive<'a>>,
    pub fields: Vec<TypeField<'a>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeField<'a> {
    pub name: &'a str,
    pub ty: &'a str,
    pub required: bool,
    pub list: bool,
    pub directives: Vec<Directive<'a>>,
}

impl<'a> TypeDef<'a> {
    pub fn directive(&self, name: &str) -> Option<&Directive<'a>> {
        self.directives.iter().find(|d| d.name == name)
    }
}

impl<'a> TypeField<'a> {
    pub fn directive(&self, name: &str) -> Option<&Directive<'a>> {
        self.directives.iter().find(|d| d.name == name)
    }
}

pub fn parse_schema(input: &str) -> ParseResult<SchemaDocument<'_>> {
    if input.trim().is_empty() {
        return Err(ParseError::SchemaDefinition("empty schema".to_owned()));
    }

    let (db_type, version, schema) = db_info(input);

    let mut parser = Parser::new(input, false)?;
    let mut types = Vec::new();

    while !parser.at(TokenKind::Eof) {
        types.push(parse_type(&mut parser)?);
    }

    Ok(SchemaDocument {
        db_type,
        version,
        schema,
        types,
        nodes: parser.nodes,
    })
}

// The header only counts when it is the first non-empty line.
fn db_info(input: &str) -> (&str, &str, &str) {
    let Some(line) = input.lines().find(|l| !l.trim().is_empty()) else {
        return ("", "", "");
    };

    let Some(info) = line.strip_prefix(DB_INFO_PREFIX) else {
        return ("", "", "");
    };

    let mut parts = info.splitn(3, ',');

    (
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
    )
}

fn parse_type<'a>(p: &mut Parser<'a>) -> ParseResult<TypeDef<'a>> {
    if !p.current().is_keyword("type") {
        return Err(p.unexpected("type"));
    }
    p.pos += 1;

    let name = p.expect(TokenKind::Name, "type name")?.value;
    let directives = p.parse_directives()?;
    p.expect(TokenKind::ObjOpen, "{")?;

    let mut fields = Vec::new();

    loop {
        if p.at(TokenKind::Eof) {
            return Err(ParseError::SchemaDefinition(format!(
                "invalid type {name}: end reached before type {name} was closed"
            )));
        }

        if p.eat(TokenKind::ObjClose) {
            break;
        }

        let field_name = p.expect(TokenKind::Name, "field name")?.value;
        p.expect(TokenKind::Colon, ":")?;

        let list = p.eat(TokenKind::ListOpen);
        let ty = p.expect(TokenKind::Name, "field type")?.value;

        if list {
            p.expect(TokenKind::ListClose, "]")?;
        }

        let required = p.eat(TokenKind::Required);
        let directives = p.parse_directives()?;

        fields.push(TypeField {
            name: field_name,
            ty,
            required,
            list,
            directives,
        });
    }

    Ok(TypeDef {
        name,
        directives,
        fields,
    })
}
