use serde::{Deserialize, Serialize};

/// The escape strategies the runtime implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscapeMode {
    Html,
    Js,
}

/// The ambient autoescape setting: a strategy or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Autoescape {
    Html,
    Js,
    Off,
}

impl Autoescape {
    pub fn mode(self) -> Option<EscapeMode> {
        match self {
            Autoescape::Html => Some(EscapeMode::Html),
            Autoescape::Js => Some(EscapeMode::Js),
            Autoescape::Off => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOp {
    Defined,
    DivisibleBy,
    Empty,
    Even,
    Iterable,
    /// True for null and for an undefined value; this is also the check
    /// behind `??`.
    Null,
    Odd,
    SameAs,
}

/// The emitted representation: an expression tree with exactly one
/// constructor per compilation rule. Every AST node compiles to a single
/// `Code` value (never a statement sequence), so fragments compose freely.
/// Call shapes mirror the runtime primitives: concatenation, escape,
/// coercions, the operator/filter/function tables, iteration, include and
/// import, hash construction and slicing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Code {
    Const {
        value: Constant,
    },
    /// Concatenates the stringified parts into the unit's output.
    Output {
        parts: Vec<Code>,
    },
    Escape {
        mode: EscapeMode,
        expr: Box<Code>,
    },
    ToBool {
        expr: Box<Code>,
    },
    ToNum {
        expr: Box<Code>,
    },
    ToStr {
        expr: Box<Code>,
    },
    /// Short-circuit; the left side arrives already boolean-coerced.
    And {
        left: Box<Code>,
        right: Box<Code>,
    },
    Or {
        left: Box<Code>,
        right: Box<Code>,
    },
    Not {
        expr: Box<Code>,
    },
    Neg {
        expr: Box<Code>,
    },
    Arith {
        op: ArithOp,
        left: Box<Code>,
        right: Box<Code>,
    },
    /// `//`: numeric divide, quotient floored.
    FloorDiv {
        left: Box<Code>,
        right: Box<Code>,
    },
    Pow {
        left: Box<Code>,
        right: Box<Code>,
    },
    Cmp {
        op: CmpOp,
        left: Box<Code>,
        right: Box<Code>,
    },
    /// `<=>`: -1/0/1. Operands are pre-bound to temporaries by the compiler
    /// so each evaluates exactly once.
    Spaceship {
        left: Box<Code>,
        right: Box<Code>,
    },
    /// `~`: both sides arrive string-coerced.
    StrConcat {
        left: Box<Code>,
        right: Box<Code>,
    },
    /// Delegates to the runtime operator table (`in`, `matches`,
    /// `starts with`, `ends with`, `..`).
    Operator {
        name: String,
        left: Box<Code>,
        right: Box<Code>,
    },
    /// Keyword test forms compile to this structural check instead of an
    /// operator-table call.
    Test {
        test: TestOp,
        expr: Box<Code>,
        arg: Option<Box<Code>>,
        negated: bool,
    },
    /// Filter-table call; `args[0]` is the filtered subject.
    Filter {
        name: String,
        args: Vec<Code>,
    },
    /// Function-table call for an unbound callee symbol.
    FuncCall {
        name: String,
        args: Vec<Code>,
    },
    /// Calls a bound callable value (macro, lambda, imported export).
    CallValue {
        callee: Box<Code>,
        args: Vec<Code>,
    },
    Array {
        items: Vec<Code>,
    },
    /// Hash construction from an alternating key/value list.
    Hash {
        items: Vec<Code>,
    },
    Index {
        expr: Box<Code>,
        prop: Box<Code>,
    },
    /// slice(value, start, length); `len` absent means "to the end".
    Slice {
        expr: Box<Code>,
        start: Box<Code>,
        len: Option<Box<Code>>,
    },
    /// A name bound by the surrounding generated code (locals, loop
    /// variables, temporaries, macro/import bindings).
    Var {
        name: String,
    },
    /// A name the unit obtains dynamically: live locals shadow the caller's
    /// data map, which shadows the runtime's ambient globals.
    DataGet {
        name: String,
    },
    /// The current unit's whole data map (used to build include contexts).
    DataMap,
    /// Binds a fresh temporary around `body`.
    Let {
        name: String,
        value: Box<Code>,
        body: Box<Code>,
    },
    /// Assigns in the nearest frame owning `name` (else the current frame)
    /// and yields the empty string.
    SetLocal {
        name: String,
        value: Box<Code>,
    },
    If {
        cond: Box<Code>,
        then: Box<Code>,
        els: Box<Code>,
    },
    /// The `for` primitive: drives `body` once per (guard-retained) item
    /// with key/value and the loop context bound; `els` runs for an empty
    /// source.
    ForLoop {
        key: Option<String>,
        val: String,
        data: Box<Code>,
        cond: Option<Box<Code>>,
        body: Box<Code>,
        els: Option<Box<Code>>,
    },
    /// Hash-merge of parts, left to right (later keys win).
    MergedContext {
        parts: Vec<Code>,
    },
    Include {
        name: Box<Code>,
        context: Box<Code>,
        optional: bool,
    },
    /// Resolves a template and yields its export table bound to the current
    /// data map.
    ImportTemplate {
        name: Box<Code>,
    },
    /// The compiling template's own export table.
    SelfTemplate,
    LambdaDef {
        params: Vec<String>,
        unit: Box<Unit>,
    },
    /// `with [expr]`: runs `body` under an overlay frame seeded from the
    /// initializer's properties in declaration order.
    WithOverlay {
        init: Option<Box<Code>>,
        body: Box<Code>,
    },
    /// `with … only`: an isolated unit invoked through a real call
    /// boundary; no ambient binding is visible inside.
    WithOnly {
        init: Option<Box<Code>>,
        unit: Box<Unit>,
    },
    Spaceless {
        body: Box<Code>,
    },
    /// Evaluates for effect, yields the empty string (the `do` tag).
    Discard {
        expr: Box<Code>,
    },
}

impl Code {
    pub fn str(value: impl Into<String>) -> Self {
        Code::Const {
            value: Constant::Str(value.into()),
        }
    }

    pub fn num(value: f64) -> Self {
        Code::Const {
            value: Constant::Num(value),
        }
    }

    pub fn var(name: impl Into<String>) -> Self {
        Code::Var { name: name.into() }
    }

    pub fn is_empty_str(&self) -> bool {
        matches!(self, Code::Const { value: Constant::Str(s) } if s.is_empty())
    }
}

/// One compiled compilation unit: the body plus the names it needs from the
/// caller-supplied data map (its "parameters").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub params: Vec<String>,
    pub body: Code,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroParam {
    pub name: String,
    pub default: Option<Code>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDef {
    pub name: String,
    pub params: Vec<MacroParam>,
    /// Extra positional arguments are captured as `varargs` only when the
    /// body references that name.
    pub varargs: bool,
    pub unit: Unit,
}

/// The factory the driver registers under a template name: a main render
/// unit plus the exported macros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub main: Unit,
    pub macros: Vec<MacroDef>,
}

/// A template reference needed by the external build driver, in source
/// encounter order. Non-literal references surface as opaque markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dependency {
    Literal { name: String },
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub template: Template,
    pub dependencies: Vec<Dependency>,
}
