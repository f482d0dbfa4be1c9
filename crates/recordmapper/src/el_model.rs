//! Parsed form of `${subject:function(args)}` expressions.

use std::collections::BTreeSet;

// =============================================================================
// Function catalogue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElFunction {
    // strings
    ToUpper,
    ToLower,
    Trim,
    Append,
    Prepend,
    Substring,
    SubstringBefore,
    SubstringAfter,
    SubstringBeforeLast,
    SubstringAfterLast,
    Replace,
    ReplaceFirst,
    ReplaceAll,
    ReplaceNull,
    ReplaceEmpty,
    PadLeft,
    PadRight,
    Length,
    ToString,
    // predicates
    IsNull,
    NotNull,
    IsEmpty,
    Equals,
    EqualsIgnoreCase,
    Contains,
    StartsWith,
    EndsWith,
    Matches,
    Find,
    In,
    Gt,
    Ge,
    Lt,
    Le,
    Not,
    And,
    Or,
    IfElse,
    // numbers
    Plus,
    Minus,
    Multiply,
    Divide,
    Mod,
    ToNumber,
    ToDecimal,
    // dates
    ToDate,
    Format,
    Now,
    // subject-less
    Literal,
}

/// name, function, min args, max args
const CATALOGUE: &[(&str, ElFunction, usize, usize)] = &[
    ("toUpper", ElFunction::ToUpper, 0, 0),
    ("toLower", ElFunction::ToLower, 0, 0),
    ("trim", ElFunction::Trim, 0, 0),
    ("append", ElFunction::Append, 1, 1),
    ("prepend", ElFunction::Prepend, 1, 1),
    ("substring", ElFunction::Substring, 1, 2),
    ("substringBefore", ElFunction::SubstringBefore, 1, 1),
    ("substringAfter", ElFunction::SubstringAfter, 1, 1),
    ("substringBeforeLast", ElFunction::SubstringBeforeLast, 1, 1),
    ("substringAfterLast", ElFunction::SubstringAfterLast, 1, 1),
    ("replace", ElFunction::Replace, 2, 2),
    ("replaceFirst", ElFunction::ReplaceFirst, 2, 2),
    ("replaceAll", ElFunction::ReplaceAll, 2, 2),
    ("replaceNull", ElFunction::ReplaceNull, 1, 1),
    ("replaceEmpty", ElFunction::ReplaceEmpty, 1, 1),
    ("padLeft", ElFunction::PadLeft, 1, 2),
    ("padRight", ElFunction::PadRight, 1, 2),
    ("length", ElFunction::Length, 0, 0),
    ("toString", ElFunction::ToString, 0, 0),
    ("isNull", ElFunction::IsNull, 0, 0),
    ("notNull", ElFunction::NotNull, 0, 0),
    ("isEmpty", ElFunction::IsEmpty, 0, 0),
    ("equals", ElFunction::Equals, 1, 1),
    ("equalsIgnoreCase", ElFunction::EqualsIgnoreCase, 1, 1),
    ("contains", ElFunction::Contains, 1, 1),
    ("startsWith", ElFunction::StartsWith, 1, 1),
    ("endsWith", ElFunction::EndsWith, 1, 1),
    ("matches", ElFunction::Matches, 1, 1),
    ("find", ElFunction::Find, 1, 1),
    ("in", ElFunction::In, 1, usize::MAX),
    ("gt", ElFunction::Gt, 1, 1),
    ("ge", ElFunction::Ge, 1, 1),
    ("lt", ElFunction::Lt, 1, 1),
    ("le", ElFunction::Le, 1, 1),
    ("not", ElFunction::Not, 0, 0),
    ("and", ElFunction::And, 1, 1),
    ("or", ElFunction::Or, 1, 1),
    ("ifElse", ElFunction::IfElse, 2, 2),
    ("plus", ElFunction::Plus, 1, 1),
    ("minus", ElFunction::Minus, 1, 1),
    ("multiply", ElFunction::Multiply, 1, 1),
    ("divide", ElFunction::Divide, 1, 1),
    ("mod", ElFunction::Mod, 1, 1),
    ("toNumber", ElFunction::ToNumber, 0, 0),
    ("toDecimal", ElFunction::ToDecimal, 0, 0),
    ("toDate", ElFunction::ToDate, 0, 2),
    ("format", ElFunction::Format, 1, 2),
    ("now", ElFunction::Now, 0, 0),
    ("literal", ElFunction::Literal, 1, 1),
];

impl ElFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        CATALOGUE
            .iter()
            .find(|(n, _, _, _)| *n == name)
            .map(|(_, func, _, _)| *func)
    }

    fn entry(&self) -> &'static (&'static str, ElFunction, usize, usize) {
        CATALOGUE
            .iter()
            .find(|(_, func, _, _)| func == self)
            .unwrap_or(&CATALOGUE[0])
    }

    pub fn name(&self) -> &'static str {
        self.entry().0
    }

    /// Inclusive bounds on the argument count.
    pub fn arity(&self) -> (usize, usize) {
        let (_, _, min, max) = self.entry();
        (*min, *max)
    }

    /// Functions that start an expression instead of taking a subject.
    pub fn is_subjectless(&self) -> bool {
        matches!(self, ElFunction::Now | ElFunction::Literal)
    }
}

// =============================================================================
// Expression tree
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ElArg {
    Text(String),
    Number(String),
    Bool(bool),
    Expr(ElExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnCall {
    pub func: ElFunction,
    pub args: Vec<ElArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElSubject {
    Attribute(String),
    Function(FnCall),
    Nested(Box<ElExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElExpr {
    pub subject: ElSubject,
    pub calls: Vec<FnCall>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(ElExpr),
}

/// Literal text interleaved with expressions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    pub parts: Vec<TemplatePart>,
}

impl Template {
    pub fn has_expressions(&self) -> bool {
        self.parts.iter().any(|part| matches!(part, TemplatePart::Expr(_)))
    }

    /// Every attribute name the template reads.
    pub fn variable_impact(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for part in &self.parts {
            if let TemplatePart::Expr(expr) = part {
                collect_expr_names(expr, &mut names);
            }
        }
        names
    }
}

fn collect_expr_names(expr: &ElExpr, names: &mut BTreeSet<String>) {
    match &expr.subject {
        ElSubject::Attribute(name) => {
            names.insert(name.clone());
        }
        ElSubject::Function(call) => collect_call_names(call, names),
        ElSubject::Nested(inner) => collect_expr_names(inner, names),
    }
    for call in &expr.calls {
        collect_call_names(call, names);
    }
}

fn collect_call_names(call: &FnCall, names: &mut BTreeSet<String>) {
    for arg in &call.args {
        if let ElArg::Expr(inner) = arg {
            collect_expr_names(inner, names);
        }
    }
}
