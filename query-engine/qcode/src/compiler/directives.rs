//! Operation, selection and field directives.

use super::{Compilation, args::expect_node};
use crate::{
    CompileError, CompileResult, Exp, ExpOp, Field, Script, Select, SkipType, Validation,
    exp::and_filter,
};
use itertools::Itertools;
use once_cell::sync::Lazy;
use query_document::{Directive, Field as DocField, NodeKind};
use std::{collections::HashMap, path::Path};

/// Value shapes accepted by a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Str,
    Num,
    Bool,
    Obj,
    StrList,
    NumList,
}

impl Shape {
    fn describe(self) -> &'static str {
        match self {
            Shape::Str => "string",
            Shape::Num => "number",
            Shape::Bool => "boolean",
            Shape::Obj => "object",
            Shape::StrList => "list of strings",
            Shape::NumList => "list of numbers",
        }
    }
}

struct Validator {
    /// Name understood by the validation engine.
    name: &'static str,
    shapes: &'static [Shape],
    /// Takes no value, e.g. `required`.
    single: bool,
}

const fn validator(name: &'static str, shapes: &'static [Shape]) -> Validator {
    Validator {
        name,
        shapes,
        single: false,
    }
}

static VALIDATORS: Lazy<HashMap<&'static str, Validator>> = Lazy::new(|| {
    use Shape::*;

    let single = |name| Validator {
        name,
        shapes: &[Bool],
        single: true,
    };

    HashMap::from([
        ("unique", single("unique")),
        ("required", single("required")),
        ("requiredIf", validator("required_if", &[Obj])),
        ("requiredUnless", validator("required_unless", &[Obj])),
        ("requiredWith", validator("required_with", &[StrList])),
        ("requiredWithAll", validator("required_with_all", &[StrList])),
        ("requiredWithout", validator("required_without", &[StrList])),
        ("requiredWithoutAll", validator("required_without_all", &[StrList])),
        ("length", validator("len", &[Str, Num])),
        ("max", validator("max", &[Num])),
        ("min", validator("min", &[Num])),
        ("equals", validator("eq", &[Str, Num])),
        ("notEquals", validator("ne", &[Str, Num])),
        ("oneOf", validator("oneof", &[NumList, StrList])),
        ("greaterThan", validator("gt", &[Num])),
        ("greaterThanOrEquals", validator("gte", &[Num])),
        ("lessThan", validator("lt", &[Num])),
        ("lessThanOrEquals", validator("lte", &[Num])),
        ("equalsField", validator("eqfield", &[Str])),
        ("notEqualsField", validator("nefield", &[Str])),
        ("greaterThanField", validator("gtfield", &[Str])),
        ("greaterThanOrEqualsField", validator("gtefield", &[Str])),
        ("lessThanField", validator("ltfield", &[Str])),
        ("lessThanOrEqualsField", validator("ltefield", &[Str])),
    ])
});

/// What `@add`, `@remove`, `@include` and `@skip` act on.
trait SkipTarget {
    fn skip_mut(&mut self) -> &mut SkipType;

    fn field_filter_mut(&mut self) -> &mut Option<Exp>;

    /// Row filter of a table selection, also narrowed by `ifVar`.
    fn row_filter_mut(&mut self) -> Option<&mut Option<Exp>>;
}

impl SkipTarget for Select {
    fn skip_mut(&mut self) -> &mut SkipType {
        &mut self.skip
    }

    fn field_filter_mut(&mut self) -> &mut Option<Exp> {
        &mut self.field_filter
    }

    fn row_filter_mut(&mut self) -> Option<&mut Option<Exp>> {
        Some(&mut self.filter)
    }
}

impl SkipTarget for Field {
    fn skip_mut(&mut self) -> &mut SkipType {
        &mut self.skip
    }

    fn field_filter_mut(&mut self) -> &mut Option<Exp> {
        &mut self.filter
    }

    fn row_filter_mut(&mut self) -> Option<&mut Option<Exp>> {
        None
    }
}

impl Compilation<'_, '_> {
    pub(super) fn compile_op_directives(&mut self) -> CompileResult<()> {
        let op = self.op;

        for d in &op.directives {
            let result = match d.name {
                "cacheControl" => self.compile_cache_control(d),
                "script" => self.compile_script(d),
                "constraint" | "validate" => self.compile_constraint(d),
                "validation" => self.compile_validation(d),
                name => {
                    return Err(CompileError::UnknownDirective {
                        scope: "operation",
                        name: name.to_owned(),
                    });
                }
            };

            result.map_err(|err| err.in_directive(d.name))?;
        }

        Ok(())
    }

    pub(super) fn compile_select_directives(&self, sel: &mut Select, field: &DocField<'_>) -> CompileResult<()> {
        for d in &field.directives {
            let result = match d.name {
                "add" | "remove" | "include" | "skip" => self.compile_skip_directive(sel, d),
                "schema" => self.compile_schema(sel, d),
                "notRelated" | "not_related" => {
                    sel.not_related = true;
                    Ok(())
                }
                "through" => self.compile_through(sel, d),
                "object" => {
                    sel.singular = true;
                    sel.paging.limit = 1;
                    Ok(())
                }
                name => {
                    return Err(CompileError::UnknownDirective {
                        scope: "selector",
                        name: name.to_owned(),
                    });
                }
            };

            result.map_err(|err| err.in_directive(d.name))?;
        }

        Ok(())
    }

    pub(super) fn compile_field_directives(&self, field: &mut Field, doc: &DocField<'_>) -> CompileResult<()> {
        for d in &doc.directives {
            let result = match d.name {
                "add" | "remove" | "include" | "skip" => self.compile_skip_directive(field, d),
                name => {
                    return Err(CompileError::UnknownDirective {
                        scope: "field",
                        name: name.to_owned(),
                    });
                }
            };

            result.map_err(|err| err.in_directive(d.name))?;
        }

        Ok(())
    }

    fn compile_skip_directive(&self, target: &mut impl SkipTarget, d: &Directive<'_>) -> CompileResult<()> {
        let nodes = &self.op.nodes;

        match d.name {
            "add" | "remove" => {
                let Some(arg) = d.arg("ifRole") else {
                    return Err(CompileError::MissingArgument("ifRole".to_owned()));
                };

                let role = expect_node(nodes, arg, &[NodeKind::Str, NodeKind::Label], "a string")?.value;

                if (d.name == "remove") == (role == self.role) {
                    *target.skip_mut() = SkipType::Drop;
                }
            }
            _ => {
                if d.args.is_empty() {
                    return Err(CompileError::InvalidArgument(
                        "arguments 'ifVar' or 'ifRole' expected".to_owned(),
                    ));
                }

                let skip = d.name == "skip";

                for arg in &d.args {
                    match arg.name {
                        "ifRole" | "if_role" => {
                            let role = expect_node(nodes, arg, &[NodeKind::Str, NodeKind::Label], "a string")?.value;

                            if skip == (role == self.role) {
                                *target.skip_mut() = SkipType::Nulled;
                            }
                        }
                        "ifVar" | "if_var" => {
                            let var = expect_node(nodes, arg, &[NodeKind::Var], "a variable")?.value;
                            let op = if skip { ExpOp::NotEqualsTrue } else { ExpOp::EqualsTrue };
                            let exp = Exp::var(op, var);

                            and_filter(target.field_filter_mut(), exp.clone());

                            if let Some(filter) = target.row_filter_mut() {
                                and_filter(filter, exp);
                            }
                        }
                        name => return Err(CompileError::UnknownArgument(name.to_owned())),
                    }
                }
            }
        }

        Ok(())
    }

    fn compile_schema(&self, sel: &mut Select, d: &Directive<'_>) -> CompileResult<()> {
        let Some(arg) = d.arg("name") else {
            return Err(CompileError::MissingArgument("name".to_owned()));
        };

        let node = expect_node(&self.op.nodes, arg, &[NodeKind::Str, NodeKind::Label], "a string")?;
        sel.schema = Some(node.value.to_owned());

        Ok(())
    }

    fn compile_through(&self, sel: &mut Select, d: &Directive<'_>) -> CompileResult<()> {
        let mut through = None;

        for arg in &d.args {
            match arg.name {
                "table" | "column" => {
                    let node = expect_node(&self.op.nodes, arg, &[NodeKind::Str, NodeKind::Label], "a string")?;
                    through = Some(self.parse_name(node.value).into_owned());
                }
                name => return Err(CompileError::UnknownArgument(name.to_owned())),
            }
        }

        match through {
            Some(through) => {
                sel.through = Some(through);
                Ok(())
            }
            None => Err(CompileError::MissingArgument("table".to_owned())),
        }
    }

    fn compile_cache_control(&mut self, d: &Directive<'_>) -> CompileResult<()> {
        if d.args.is_empty() {
            return Err(CompileError::InvalidArgument(
                "arguments 'maxAge' or 'scope' expected".to_owned(),
            ));
        }

        let nodes = &self.op.nodes;
        let mut header = Vec::with_capacity(d.args.len());

        for arg in &d.args {
            match arg.name {
                "maxAge" => {
                    let node = expect_node(nodes, arg, &[NodeKind::Num], "a number")?;
                    header.push(format!("max-age={}", node.value));
                }
                "scope" => {
                    let node = expect_node(nodes, arg, &[NodeKind::Str, NodeKind::Label], "a string")?;
                    header.push(node.value.to_owned());
                }
                name => return Err(CompileError::UnknownArgument(name.to_owned())),
            }
        }

        self.qc.cache.header = header.join(" ");

        Ok(())
    }

    fn compile_script(&mut self, d: &Directive<'_>) -> CompileResult<()> {
        let mut name = match d.arg("name") {
            Some(arg) => expect_node(&self.op.nodes, arg, &[NodeKind::Str], "a string")?.value.to_owned(),
            None if d.args.is_empty() => self.qc.name.clone(),
            None => return Err(CompileError::MissingArgument("name".to_owned())),
        };

        if name.is_empty() {
            return Err(CompileError::InvalidArgument(
                "a named operation or a script name is required".to_owned(),
            ));
        }

        if Path::new(&name).extension().is_none() {
            name.push_str(".js");
        }

        self.qc.script = Some(Script { name });

        Ok(())
    }

    fn compile_validation(&mut self, d: &Directive<'_>) -> CompileResult<()> {
        if d.args.is_empty() {
            return Err(CompileError::InvalidArgument(
                "required arguments 'src' and 'type'".to_owned(),
            ));
        }

        let nodes = &self.op.nodes;
        let mut validation = Validation::default();

        for arg in &d.args {
            let value = || expect_node(nodes, arg, &[NodeKind::Str], "a string").map(|n| n.value.to_owned());

            match arg.name {
                "src" | "source" => validation.source = value()?,
                "type" | "lang" => validation.kind = value()?,
                name => return Err(CompileError::UnknownArgument(name.to_owned())),
            }
        }

        self.qc.validation = Some(validation);

        Ok(())
    }

    /// Adds validation rules for one variable, e.g.
    /// `@constraint(variable: "email", format: "email", min: 1, error: "bad email")`.
    fn compile_constraint(&mut self, d: &Directive<'_>) -> CompileResult<()> {
        let nodes = &self.op.nodes;
        let mut var = None;
        let mut message = None;
        let mut rules = Vec::new();

        for arg in &d.args {
            let node = &nodes[arg.value];

            match arg.name {
                "variable" => {
                    let value = expect_node(nodes, arg, &[NodeKind::Str, NodeKind::Var], "a string")?.value;
                    var = Some(value.trim_start_matches('$').to_owned());
                }
                "error" => {
                    message = Some(expect_node(nodes, arg, &[NodeKind::Str], "a string")?.value.to_owned());
                }
                "format" => {
                    rules.push(expect_node(nodes, arg, &[NodeKind::Str], "a string")?.value.to_owned());
                }
                name => {
                    let Some(v) = VALIDATORS.get(name) else {
                        return Err(CompileError::UnknownValidator(name.to_owned()));
                    };

                    if !v.shapes.iter().any(|&shape| matches_shape(nodes, node, shape)) {
                        return Err(CompileError::ArgumentType {
                            arg: name.to_owned(),
                            expected: format!("of type: {}", v.shapes.iter().map(|s| s.describe()).join(", ")),
                        });
                    }

                    if v.single {
                        rules.push(v.name.to_owned());
                        continue;
                    }

                    let value = match node.kind {
                        NodeKind::Obj => nodes
                            .children(arg.value)
                            .map(|(_, c)| format!("{} {}", c.name, c.value))
                            .join(" "),
                        NodeKind::List => nodes.children(arg.value).map(|(_, c)| c.value).join(" "),
                        _ => node.value.to_owned(),
                    };

                    rules.push(format!("{}={value}", v.name));
                }
            }
        }

        let Some(var) = var else {
            return Err(CompileError::MissingArgument("variable".to_owned()));
        };

        let mut options = rules.join(",");

        if let Some(message) = message {
            options.push('~');
            options.push_str(&message);
        }

        self.qc.constraints.insert(var, options);

        Ok(())
    }
}

fn matches_shape(nodes: &query_document::NodeArena<'_>, node: &query_document::Node<'_>, shape: Shape) -> bool {
    let first = || node.children.first().map(|&c| nodes[c].kind);

    match shape {
        Shape::Str => node.kind == NodeKind::Str,
        Shape::Num => node.kind == NodeKind::Num,
        Shape::Bool => node.kind == NodeKind::Bool,
        Shape::Obj => node.kind == NodeKind::Obj,
        Shape::StrList => node.kind == NodeKind::List && matches!(first(), None | Some(NodeKind::Str)),
        Shape::NumList => node.kind == NodeKind::List && matches!(first(), None | Some(NodeKind::Num)),
    }
}
