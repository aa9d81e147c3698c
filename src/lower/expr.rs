use crate::{
    context::{Context, Features, Phase},
    error::Degradation,
    graph::{format_number, Node, NodeKind},
    ir::{CType, Lowered, Origin, Prec, StorageDecl, ValueKind},
};

use super::{boolean, display, number, peripheral, stmt, text, to_number, Slot};

pub fn lower_expr(context: &mut Context, node: &Node, slot: Slot<'_>) -> Lowered {
    use NodeKind::*;

    match node.kind() {
        CanvasWidth => Lowered::number("128"),
        CanvasHeight => Lowered::number("64"),

        Boolean => Lowered::boolean(node.field("BOOL").as_deref() != Some("FALSE")),
        Compare => compare(context, node),
        Operation => logical(context, node),

        Negate => {
            let operand = boolean(context, node, "BOOL", false);
            Lowered::expr(
                format!("!{}", operand.operand(Prec::Unary)),
                ValueKind::Boolean,
                Prec::Unary,
            )
        }

        Number => {
            let literal = node.number_field("NUM").map(format_number);
            Lowered::number(literal.as_deref().unwrap_or("0"))
        }

        Arithmetic => arithmetic(context, node),
        BitAnd | BitOr | BitXor => bitwise(context, node),

        BitNot => {
            let operand = numeric(context, node, "A", "0");
            Lowered::expr(
                format!("~{}", operand.operand(Prec::Unary)),
                ValueKind::Number,
                Prec::Unary,
            )
        }

        HexNumber => {
            let literal = node.field_or("HEX", "0x0");
            let literal = literal.trim();
            let valid = literal
                .strip_prefix("0x")
                .or_else(|| literal.strip_prefix("0X"))
                .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()))
                .unwrap_or(false);

            Lowered::number(if valid { literal } else { "0x0" })
        }

        Text => Lowered::text(&node.raw_field("TEXT")),

        GetVariable => {
            let wants_text = *slot.consumer == StringLength || slot.consumer.is_text_slot(slot.input);
            let decl = stmt::variable(context, node, wants_text);
            let origin = match decl.kind() {
                ValueKind::Bytes => Origin::Array(decl.name.clone()),
                _ => Origin::State,
            };

            Lowered {
                code: decl.place(),
                kind: decl.kind(),
                prec: Prec::Atomic,
                origin,
            }
        }

        StringToNumber => {
            let value = text(context, node, "STRING", "");
            to_number(context, value)
        }

        NumberToString => number_to_string(context, node),

        StringLength => {
            let value = display(context, node, "STRING", "");
            Lowered::expr(
                format!("(int)strlen({})", value.code),
                ValueKind::Number,
                Prec::Unary,
            )
        }

        RandomNumber => {
            let min = numeric(context, node, "MIN", "0");
            let max = numeric(context, node, "MAX", "100");
            context.enable(Features::RANDOM);

            Lowered::atom(
                format!("random_range({}, {})", min.code, max.code),
                ValueKind::Number,
            )
        }

        StorageRead | StorageExists | GpioRead | AnalogRead | Potentiometer | PwmRead
        | Ultrasonic | PirMotion | Dht11Temperature | Dht11Humidity | I2cDeviceReady
        | I2cReadReg8 | I2cReadReg16 | I2cReadBytes | ByteStream | ByteStreamLength
        | ByteStreamGetByte => peripheral::lower_expr(context, node),

        Unknown(kind) => {
            context.degrade(Degradation::UnknownKind(kind.clone()));
            Lowered::number("0")
        }

        other => {
            context.degrade(Degradation::StatementAsExpression(other.as_str().to_owned()));
            Lowered::number("0")
        }
    }
}

/// Entrada numérica; el texto se convierte extrayendo su primer entero.
pub(super) fn numeric(context: &mut Context, node: &Node, input: &str, default: &str) -> Lowered {
    let value = number(context, node, input, default);
    to_number(context, value)
}

fn compare(context: &mut Context, node: &Node) -> Lowered {
    let (operator, prec) = match node.field("OP").as_deref() {
        Some("NEQ") => ("!=", Prec::Equality),
        Some("LT") => ("<", Prec::Relational),
        Some("LTE") => ("<=", Prec::Relational),
        Some("GT") => (">", Prec::Relational),
        Some("GTE") => (">=", Prec::Relational),
        _ => ("==", Prec::Equality),
    };

    let a = number(context, node, "A", "0");
    let b = number(context, node, "B", "0");

    if a.kind == ValueKind::Text && b.kind == ValueKind::Text {
        return Lowered::expr(
            format!("strcmp({}, {}) {} 0", a.code, b.code, operator),
            ValueKind::Boolean,
            prec,
        );
    }

    let a = to_number(context, a);
    let b = to_number(context, b);

    // Una comparación dentro de otra siempre lleva paréntesis
    Lowered::expr(
        format!(
            "{} {} {}",
            a.operand(Prec::Additive),
            operator,
            b.operand(Prec::Additive)
        ),
        ValueKind::Boolean,
        prec,
    )
}

fn logical(context: &mut Context, node: &Node) -> Lowered {
    let (operator, prec) = match node.field("OP").as_deref() {
        Some("OR") => ("||", Prec::LogicalOr),
        _ => ("&&", Prec::LogicalAnd),
    };

    let a = boolean(context, node, "A", false);
    let b = boolean(context, node, "B", false);

    Lowered::expr(
        format!(
            "{} {} {}",
            a.operand(Prec::BitOr),
            operator,
            b.operand(Prec::BitOr)
        ),
        ValueKind::Boolean,
        prec,
    )
}

fn arithmetic(context: &mut Context, node: &Node) -> Lowered {
    let a = numeric(context, node, "A", "0");
    let b = numeric(context, node, "B", "0");

    let (operator, prec) = match node.field("OP").as_deref() {
        Some("MINUS") => ("-", Prec::Additive),
        Some("MULTIPLY") => ("*", Prec::Multiplicative),
        Some("DIVIDE") => ("/", Prec::Multiplicative),

        Some("POWER") => {
            context.enable(Features::MATH);
            return Lowered::atom(format!("pow({}, {})", a.code, b.code), ValueKind::Number);
        }

        _ => ("+", Prec::Additive),
    };

    Lowered::expr(
        format!("{} {} {}", a.operand(prec), operator, b.right_operand(prec)),
        ValueKind::Number,
        prec,
    )
}

fn bitwise(context: &mut Context, node: &Node) -> Lowered {
    let (operator, prec) = match node.kind() {
        NodeKind::BitOr => ("|", Prec::BitOr),
        NodeKind::BitXor => ("^", Prec::BitXor),
        _ => ("&", Prec::BitAnd),
    };

    let a = numeric(context, node, "A", "0");
    let b = numeric(context, node, "B", "0");

    Lowered::expr(
        format!(
            "{} {} {}",
            a.operand(Prec::Unary),
            operator,
            b.operand(Prec::Unary)
        ),
        ValueKind::Number,
        prec,
    )
}

/// Texto decimal de un número.
///
/// Durante el dibujado la conversión se difiere al inicio del redibujado.
/// En cualquier otra fase se evalúa en el sitio, sobre el mismo búfer.
fn number_to_string(context: &mut Context, node: &Node) -> Lowered {
    let value = number(context, node, "NUMBER", "0");
    match value.kind {
        ValueKind::Text => return value,
        _ if value.is_literal() => return Lowered::text(&value.code),
        _ => (),
    }

    let key = format!("num_str:{}", value.code);
    let buffer = match context.slot(&key) {
        Some(buffer) => buffer.to_owned(),
        None => {
            let buffer = context.fresh("num_str");
            context.declare(StorageDecl::new(buffer.clone(), CType::Text(32)));
            context.remember_slot(key, buffer.clone());
            buffer
        }
    };

    let conversion = format!(
        "snprintf({0}, sizeof({0}), \"%ld\", (long)({1}))",
        buffer, value.code
    );

    if context.phase() == Phase::Render {
        context.hoist(format!("{};", conversion));
        Lowered::atom(buffer, ValueKind::Text)
    } else {
        Lowered::atom(format!("({}, {})", conversion, buffer), ValueKind::Text)
    }
}
