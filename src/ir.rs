use std::fmt::Write;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Text,
    Boolean,
    Bytes,
}

/// Precedencia de C, de mayor a menor ligadura.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    Atomic,
    Unary,
    Multiplicative,
    Additive,
    Relational,
    Equality,
    BitAnd,
    BitXor,
    BitOr,
    LogicalAnd,
    LogicalOr,
    Conditional,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Expr,
    Literal,
    State,
    Array(String),
}

/// Fragmento de expresión C ya traducido.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Lowered {
    pub code: String,
    pub kind: ValueKind,
    pub prec: Prec,
    pub origin: Origin,
}

impl Lowered {
    pub fn expr<S: Into<String>>(code: S, kind: ValueKind, prec: Prec) -> Self {
        Lowered {
            code: code.into(),
            kind,
            prec,
            origin: Origin::Expr,
        }
    }

    pub fn atom<S: Into<String>>(code: S, kind: ValueKind) -> Self {
        Lowered::expr(code, kind, Prec::Atomic)
    }

    pub fn number(literal: &str) -> Self {
        let prec = if literal.starts_with('-') {
            Prec::Unary
        } else {
            Prec::Atomic
        };

        Lowered {
            code: literal.to_owned(),
            kind: ValueKind::Number,
            prec,
            origin: Origin::Literal,
        }
    }

    pub fn text(contents: &str) -> Self {
        Lowered {
            code: c_string(contents),
            kind: ValueKind::Text,
            prec: Prec::Atomic,
            origin: Origin::Literal,
        }
    }

    pub fn boolean(value: bool) -> Self {
        Lowered {
            code: String::from(if value { "true" } else { "false" }),
            kind: ValueKind::Boolean,
            prec: Prec::Atomic,
            origin: Origin::Literal,
        }
    }

    pub fn is_literal(&self) -> bool {
        self.origin == Origin::Literal
    }

    /// Código apto para aparecer como operando de un operador de
    /// precedencia `context`. Los operandos izquierdos de la misma
    /// precedencia no requieren paréntesis.
    pub fn operand(&self, context: Prec) -> String {
        if self.prec > context {
            format!("({})", self.code)
        } else {
            self.code.clone()
        }
    }

    /// Como [`Lowered::operand`], pero para el lado derecho.
    pub fn right_operand(&self, context: Prec) -> String {
        if self.prec >= context && self.prec != Prec::Atomic {
            format!("({})", self.code)
        } else {
            self.code.clone()
        }
    }

    /// Literal numérico entero, si el fragmento es uno.
    pub fn as_integer(&self) -> Option<i64> {
        if self.is_literal() && self.kind == ValueKind::Number {
            self.code.parse().ok()
        } else {
            None
        }
    }
}

/// Escapa un texto como literal de cadena de C.
pub fn c_string(contents: &str) -> String {
    let mut literal = String::with_capacity(contents.len() + 2);
    literal.push('"');

    for c in contents.chars() {
        match c {
            '\\' => literal.push_str("\\\\"),
            '"' => literal.push_str("\\\""),
            '\n' => literal.push_str("\\n"),
            '\r' => literal.push_str("\\r"),
            '\t' => literal.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(literal, "\\x{:02x}", c as u32);
            }

            c => literal.push(c),
        }
    }

    literal.push('"');
    literal
}

/// Antepone un nivel de sangría a cada línea no vacía.
pub fn indent(code: &str) -> String {
    let mut indented = String::with_capacity(code.len() + 16);
    for line in code.lines() {
        if !line.trim().is_empty() {
            indented.push_str("    ");
            indented.push_str(line);
        }

        indented.push('\n');
    }

    indented
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CType {
    Int,
    U8,
    U16,
    U32,
    Text(usize),
    Bytes { len: usize, init: Option<Vec<u8>> },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Instance,
    Global,
}

/// Declaración de almacenamiento del programa generado.
///
/// Los escalares viven en la estructura de la aplicación y se acceden
/// como `app->nombre`. Los búferes y arreglos son globales.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageDecl {
    pub name: String,
    pub ty: CType,
}

impl StorageDecl {
    pub fn new<S: Into<String>>(name: S, ty: CType) -> Self {
        StorageDecl {
            name: name.into(),
            ty,
        }
    }

    pub fn scope(&self) -> Scope {
        match self.ty {
            CType::Text(_) | CType::Bytes { .. } => Scope::Global,
            _ => Scope::Instance,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self.ty {
            CType::Text(_) => ValueKind::Text,
            CType::Bytes { .. } => ValueKind::Bytes,
            _ => ValueKind::Number,
        }
    }

    /// Expresión que designa el almacenamiento desde cualquier función
    /// que tenga acceso a `app`.
    pub fn place(&self) -> String {
        match self.scope() {
            Scope::Instance => format!("app->{}", self.name),
            Scope::Global => self.name.clone(),
        }
    }

    pub fn declaration(&self) -> String {
        let name = &self.name;
        match &self.ty {
            CType::Int => format!("int {};", name),
            CType::U8 => format!("uint8_t {};", name),
            CType::U16 => format!("uint16_t {};", name),
            CType::U32 => format!("uint32_t {};", name),
            CType::Text(size) => format!("char {}[{}];", name, size),
            CType::Bytes { len, init: None } => format!("uint8_t {}[{}];", name, len),
            CType::Bytes {
                len,
                init: Some(bytes),
            } => {
                let bytes: Vec<_> = bytes.iter().map(|byte| format!("0x{:02X}", byte)).collect();
                format!("uint8_t {}[{}] = {{ {} }};", name, len, bytes.join(", "))
            }
        }
    }

    /// Inicialización a cero de los escalares de instancia.
    pub fn zero_init(&self) -> Option<String> {
        match self.scope() {
            Scope::Instance => Some(format!("{} = 0;", self.place())),
            Scope::Global => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operands_are_parenthesized_by_precedence() {
        let sum = Lowered::expr("a + b", ValueKind::Number, Prec::Additive);
        assert_eq!(sum.operand(Prec::Multiplicative), "(a + b)");
        assert_eq!(sum.operand(Prec::Additive), "a + b");
        assert_eq!(sum.right_operand(Prec::Additive), "(a + b)");
        assert_eq!(Lowered::number("-5").right_operand(Prec::Additive), "-5");
        assert_eq!(Lowered::number("-5").operand(Prec::Atomic), "(-5)");
    }

    #[test]
    fn strings_are_escaped() {
        assert_eq!(c_string(r#"say "hi" \o/"#), r#""say \"hi\" \\o/""#);
        assert_eq!(c_string("two\nlines"), r#""two\nlines""#);
    }

    #[test]
    fn scalars_live_in_the_instance() {
        let counter = StorageDecl::new("counter", CType::Int);
        assert_eq!(counter.place(), "app->counter");
        assert_eq!(counter.declaration(), "int counter;");
        assert_eq!(counter.zero_init().as_deref(), Some("app->counter = 0;"));

        let name = StorageDecl::new("name", CType::Text(256));
        assert_eq!(name.place(), "name");
        assert_eq!(name.declaration(), "char name[256];");
        assert_eq!(name.zero_init(), None);
    }

    #[test]
    fn byte_arrays_render_initializers() {
        let stream = StorageDecl::new(
            "byte_stream_0",
            CType::Bytes {
                len: 2,
                init: Some(vec![0x0a, 0xff]),
            },
        );

        assert_eq!(stream.declaration(), "uint8_t byte_stream_0[2] = { 0x0A, 0xFF };");
    }

    #[test]
    fn indentation_skips_blank_lines() {
        assert_eq!(indent("a;\n\nb;\n"), "    a;\n\n    b;\n");
    }
}
