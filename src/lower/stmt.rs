use crate::{
    codegen::manifest::ManifestSpec,
    context::{Context, Features, Phase},
    error::Degradation,
    graph::{Node, NodeKind},
    ident::{self, sanitize},
    ir::{indent, CType, Lowered, Prec, StorageDecl, ValueKind},
};

use super::{boolean, comment, display, number, peripheral, statements, text, to_number};

pub fn lower_statement(context: &mut Context, node: &Node) -> String {
    use NodeKind::*;

    match node.kind() {
        App => app(context, node),

        Manifest => {
            context.push_manifest(ManifestSpec::from_node(node));
            String::new()
        }

        // El widget y la navegación ya cubren estos bloques
        ViewportSetup | CanvasClear | SetFont | SetColor | ExitOnBackShort => String::new(),

        DrawText | DrawTextAligned | DrawBox | DrawFrame | DrawRoundedBox | DrawRoundedFrame
        | DrawLine | DrawCircle | DrawDisc | DrawDot | TextBox | TextScroll => draw(context, node),

        Button => button(context, node),
        IfKeyType => key_check(context, node),

        RequestRedraw => String::from(
            "view_dispatcher_send_custom_event(app->view_dispatcher, CustomEventTypeRedraw);\n",
        ),

        NotifySequence => {
            context.enable(Features::NOTIFICATIONS);
            let sequence = node.field("SEQ");
            let sequence = ident::symbol_or(sequence.as_deref(), "sequence_success");

            format!("notification_message(app->notif, &{});\n", sequence)
        }

        SleepMs => {
            let ms = number(context, node, "MS", "0");
            let ms = to_number(context, ms);
            format!("furi_delay_ms({});\n", ms.code)
        }

        Log => log(context, node),
        Print => print(context, node),
        TimerPeriodic => timer(context, node),

        If => conditional(context, node),
        Repeat => repeat(context, node),
        WhileUntil => while_until(context, node),
        SetVariable => assign(context, node),
        ChangeVariable => change(context, node),

        StorageWrite | StorageCreate | StorageDelete | GpioInit | GpioWrite | PwmStart | PwmSet
        | PwmStop | Servo | ServoUnlock | I2cWriteReg8 | I2cWriteReg16 | I2cWriteBytes
        | I2cUpdateBits8 => peripheral::lower_statement(context, node),

        Unknown(kind) => {
            context.degrade(Degradation::UnknownKind(kind.clone()));
            format!("/* unsupported block: {} */\n", kind.replace("*/", "* /"))
        }

        other => {
            let kind = other.as_str().to_owned();
            let placeholder = comment(&format!("value block {} ignored", kind));
            context.degrade(Degradation::ExpressionAsStatement(kind));

            placeholder
        }
    }
}

/// Reparte las cuatro entradas de la aplicación en sus fases.
fn app(context: &mut Context, node: &Node) -> String {
    let slots = [
        ("SETUP", Phase::Setup),
        ("DRAW", Phase::Render),
        ("INPUT", Phase::Input),
        ("LOOP", Phase::Loop),
    ];

    for (input, phase) in slots {
        let code = context.in_phase(phase, |context| statements(context, node, input));
        context.append(phase, &code);
    }

    String::new()
}

fn draw(context: &mut Context, node: &Node) -> String {
    use NodeKind::*;

    let coordinate = |context: &mut Context, input: &str| number(context, node, input, "0").code;
    let x = coordinate(context, "X");
    let y = coordinate(context, "Y");

    match node.kind() {
        DrawText => {
            let text = display(context, node, "TEXT", "Hello");
            format!(
                "widget_add_string_element(app->widget, {}, {}, AlignLeft, AlignTop, FontPrimary, {});\n",
                x, y, text.code
            )
        }

        DrawTextAligned => {
            let text = display(context, node, "TEXT", "");
            let (horizontal, vertical) = alignment(node);
            format!(
                "widget_add_string_element(app->widget, {}, {}, {}, {}, FontPrimary, {});\n",
                x, y, horizontal, vertical, text.code
            )
        }

        DrawBox | DrawFrame | DrawRoundedBox | DrawRoundedFrame => {
            let w = coordinate(context, "W");
            let h = coordinate(context, "H");
            let (radius, fill) = match node.kind() {
                DrawBox => (String::from("0"), true),
                DrawFrame => (String::from("0"), false),
                DrawRoundedBox => (number(context, node, "R", "3").code, true),
                _ => (number(context, node, "R", "3").code, false),
            };

            format!(
                "widget_add_rect_element(app->widget, {}, {}, {}, {}, {}, {});\n",
                x, y, w, h, radius, fill
            )
        }

        DrawLine => {
            // Las líneas usan X1/Y1 en vez de X/Y
            let x1 = coordinate(context, "X1");
            let y1 = coordinate(context, "Y1");
            let x2 = coordinate(context, "X2");
            let y2 = coordinate(context, "Y2");
            format!(
                "widget_add_line_element(app->widget, {}, {}, {}, {});\n",
                x1, y1, x2, y2
            )
        }

        DrawCircle | DrawDisc | DrawDot => {
            let (radius, fill) = match node.kind() {
                DrawCircle => (coordinate(context, "R"), false),
                DrawDisc => (coordinate(context, "R"), true),
                _ => (String::from("1"), true),
            };

            format!(
                "widget_add_circle_element(app->widget, {}, {}, {}, {});\n",
                x, y, radius, fill
            )
        }

        TextBox => {
            let w = coordinate(context, "W");
            let h = coordinate(context, "H");
            let (horizontal, vertical) = alignment(node);
            let text = display(context, node, "TEXT", "");
            let strip = node.field("STRIP").as_deref() == Some("TRUE");
            format!(
                "widget_add_text_box_element(app->widget, {}, {}, {}, {}, {}, {}, {}, {});\n",
                x, y, w, h, horizontal, vertical, text.code, strip
            )
        }

        _ => {
            let w = coordinate(context, "W");
            let h = coordinate(context, "H");
            let text = display(context, node, "TEXT", "");
            format!(
                "widget_add_text_scroll_element(app->widget, {}, {}, {}, {}, {});\n",
                x, y, w, h, text.code
            )
        }
    }
}

fn alignment(node: &Node) -> (String, String) {
    let horizontal = node.field("HALIGN");
    let vertical = node.field("VALIGN");

    (
        ident::symbol_or(horizontal.as_deref(), "AlignLeft").to_owned(),
        ident::symbol_or(vertical.as_deref(), "AlignTop").to_owned(),
    )
}

fn button(context: &mut Context, node: &Node) -> String {
    let kind = node.field("BTN");
    let kind = ident::symbol_or(kind.as_deref(), "GuiButtonTypeLeft").to_owned();
    let label = display(context, node, "LABEL", "Btn");

    let body = context.in_phase(Phase::Button, |context| statements(context, node, "DO"));
    let callback = if body.trim().is_empty() {
        String::from("NULL, NULL")
    } else {
        let index = context.push_button(body);
        format!("app_button_cb_{}, app", index)
    };

    format!(
        "widget_add_button_element(app->widget, {}, {}, {});\n",
        kind, label.code, callback
    )
}

fn key_check(context: &mut Context, node: &Node) -> String {
    if context.phase() != Phase::Input {
        let kind = node.kind().as_str().to_owned();
        let placeholder = comment(&format!("{} ignored outside the input section", kind));
        context.degrade(Degradation::WrongPhase(kind, Phase::Input.describe()));

        return placeholder;
    }

    let event_type = node.field("TYPE");
    let key = node.field("KEY");
    let body = statements(context, node, "DO");

    format!(
        "if(event->type == {} && event->key == {}) {{\n{}    consumed = true;\n}}\n",
        ident::symbol_or(event_type.as_deref(), "InputTypeShort"),
        ident::symbol_or(key.as_deref(), "InputKeyOk"),
        indent(&body)
    )
}

fn log(context: &mut Context, node: &Node) -> String {
    let macro_name = match node.field("LEVEL").as_deref() {
        Some("E") => "FURI_LOG_E",
        Some("W") => "FURI_LOG_W",
        Some("D") => "FURI_LOG_D",
        Some("T") => "FURI_LOG_T",
        _ => "FURI_LOG_I",
    };

    let tag = display(context, node, "TAG", "APP");
    let message = text(context, node, "MSG", "");

    format!("{}({}, {});\n", macro_name, tag.code, format_arguments(&message, ""))
}

fn print(context: &mut Context, node: &Node) -> String {
    let value = text(context, node, "TEXT", "");
    format!(
        "FURI_LOG_I(\"APP\", {});\n",
        format_arguments(&value, "Print: ")
    )
}

/// Cadena de formato y argumentos para un macro de bitácora.
fn format_arguments(value: &Lowered, prefix: &str) -> String {
    match value.kind {
        // Un literal de texto se convierte en la cadena de formato
        ValueKind::Text if value.is_literal() => {
            let contents = &value.code[1..value.code.len() - 1];
            format!("\"{}{}\"", prefix, contents.replace('%', "%%"))
        }

        ValueKind::Text => format!("\"{}%s\", {}", prefix, value.code),
        ValueKind::Bytes => format!("\"{}%p\", (void*){}", prefix, value.code),
        ValueKind::Number | ValueKind::Boolean => format!("\"{}%d\", (int)({})", prefix, value.code),
    }
}

fn timer(context: &mut Context, node: &Node) -> String {
    let interval = node
        .number_field("INTERVAL")
        .unwrap_or(500.0)
        .max(1.0)
        .min(f64::from(u32::MAX)) as u32;

    let body = context.in_phase(Phase::Timer, |context| statements(context, node, "DO"));

    context.enable(Features::TIMER);
    context.push_timer(interval, body);

    String::new()
}

fn conditional(context: &mut Context, node: &Node) -> String {
    let mut code = String::new();
    let mut branch = 0;

    loop {
        let condition = format!("IF{}", branch);
        let body = format!("DO{}", branch);
        if branch > 0 && !node.has_input(&condition) && !node.has_input(&body) {
            break;
        }

        let condition = boolean(context, node, &condition, false);
        let body = statements(context, node, &body);
        let keyword = if branch == 0 { "if" } else { "} else if" };

        code.push_str(&format!("{} ({}) {{\n{}", keyword, condition.code, indent(&body)));
        branch += 1;
    }

    let otherwise = statements(context, node, "ELSE");
    if !otherwise.trim().is_empty() {
        code.push_str("} else {\n");
        code.push_str(&indent(&otherwise));
    }

    code.push_str("}\n");
    code
}

fn repeat(context: &mut Context, node: &Node) -> String {
    let times = number(context, node, "TIMES", "1");
    let times = to_number(context, times);
    let counter = context.fresh("i");
    let body = statements(context, node, "DO");

    format!(
        "for(int {0} = 0; {0} < {1}; {0}++) {{\n{2}}}\n",
        counter,
        times.right_operand(Prec::Relational),
        indent(&body)
    )
}

fn while_until(context: &mut Context, node: &Node) -> String {
    let condition = boolean(context, node, "BOOL", false);
    let condition = match node.field("MODE").as_deref() {
        Some("UNTIL") => format!("!{}", condition.operand(Prec::Atomic)),
        _ => condition.code,
    };

    let body = statements(context, node, "DO");
    format!("while({}) {{\n{}}}\n", condition, indent(&body))
}

/// Declara una variable la primera vez que se observa.
pub(super) fn variable(context: &mut Context, node: &Node, text: bool) -> StorageDecl {
    let name = sanitize(&node.field_or("VAR", ident::FALLBACK));
    if let Some(decl) = context.lookup(&name) {
        return decl.clone();
    }

    let ty = if text { CType::Text(256) } else { CType::Int };
    context.declare(StorageDecl::new(name, ty)).clone()
}

fn assign(context: &mut Context, node: &Node) -> String {
    let value = context.tentatively(|context| {
        Some(number(context, node, "VALUE", "0")).filter(|value| value.kind != ValueKind::Bytes)
    });

    let value = match value {
        Some(value) => value,
        None => {
            let name = sanitize(&node.field_or("VAR", ident::FALLBACK));
            let placeholder = comment(&format!("cannot assign a byte stream to {}", name));
            context.degrade(Degradation::ByteStreamAsValue(name));

            return placeholder;
        }
    };

    let decl = variable(context, node, value.kind == ValueKind::Text);
    let place = decl.place();

    match (decl.kind(), value.kind) {
        (ValueKind::Text, ValueKind::Text) => format!(
            "strncpy({0}, {1}, sizeof({0}) - 1);\n{0}[sizeof({0}) - 1] = '\\0';\n",
            place, value.code
        ),

        (ValueKind::Text, _) => format!(
            "snprintf({0}, sizeof({0}), \"%d\", (int)({1}));\n",
            place, value.code
        ),

        _ => {
            let value = to_number(context, value);
            format!("{} = {};\n", place, value.code)
        }
    }
}

// La variable se resuelve antes que el incremento, que no se traduce si
// la variable guarda texto.
fn change(context: &mut Context, node: &Node) -> String {
    let decl = variable(context, node, false);

    if decl.kind() != ValueKind::Number {
        let placeholder = comment(&format!("cannot add a number to {}", decl.name));
        context.degrade(Degradation::TextArithmetic(decl.name));

        return placeholder;
    }

    let delta = number(context, node, "DELTA", "1");
    let delta = to_number(context, delta);

    format!("{} += {};\n", decl.place(), delta.code)
}
