//! Traducción del grafo a fragmentos de C.
//!
//! El recorrido es recursivo y en profundidad. Las expresiones producen
//! [`Lowered`], las sentencias producen texto con sangría relativa, y
//! ambos registran sus efectos colaterales en el [`Context`].

use tracing::{debug, trace};

use crate::{
    context::{Context, Phase},
    error::Degradation,
    graph::{Graph, Node, NodeKind},
    ir::{CType, Lowered, StorageDecl, ValueKind},
    stack::ensure_sufficient_stack,
};

mod expr;
mod peripheral;
mod stmt;

/// Entrada de valor que está siendo traducida, vista desde su consumidor.
#[derive(Copy, Clone)]
pub struct Slot<'a> {
    pub consumer: &'a NodeKind,
    pub input: &'a str,
}

/// Traduce todos los bloques de nivel superior, en orden.
///
/// Fuera de la aplicación solo cuentan los efectos sobre el contexto,
/// como las fases que agrega el bloque de aplicación o los manifiestos.
pub fn lower_graph(graph: &Graph, context: &mut Context) {
    debug!(roots = graph.roots().len(), "lowering graph");

    for (index, root) in graph.roots().iter().enumerate() {
        context.within(format!("blocks[{}]", index), root.id(), |context| {
            if root.kind().produces_value() {
                context.degrade(Degradation::Detached(root.kind().as_str().to_owned()));
                return;
            }

            context.in_phase(Phase::Detached, |context| lower_loose(context, root));
        });
    }
}

/// Traduce una cadena suelta bloque por bloque.
///
/// Un bloque que produce código propio no tiene dónde ejecutarse, así que
/// se descarta junto con todo lo que registró en el contexto.
fn lower_loose(context: &mut Context, first: &Node) {
    let mut depth = 0;
    let mut current = Some(first);

    while let Some(node) = current {
        if depth > 0 {
            context.enter(String::from("next"), node.id());
        }

        let kept = context.tentatively(|context| {
            let code = stmt::lower_statement(context, node);
            Some(()).filter(|_| code.trim().is_empty())
        });

        if kept.is_none() {
            context.degrade(Degradation::Detached(node.kind().as_str().to_owned()));
        }

        current = node.next();
        depth += 1;
    }

    for _ in 1..depth {
        context.leave();
    }
}

/// Traduce una cadena de sentencias enlazadas por `next`.
pub fn lower_chain(context: &mut Context, first: &Node) -> String {
    let mut code = String::new();
    let mut depth = 0;
    let mut current = Some(first);

    while let Some(node) = current {
        if depth > 0 {
            context.enter(String::from("next"), node.id());
        }

        trace!(kind = node.kind().as_str(), "statement");
        code.push_str(&stmt::lower_statement(context, node));

        current = node.next();
        depth += 1;
    }

    for _ in 1..depth {
        context.leave();
    }

    code
}

/// Traduce las sentencias de una entrada de sentencia.
pub(crate) fn statements(context: &mut Context, node: &Node, input: &str) -> String {
    match node.statement(input) {
        Some(child) => ensure_sufficient_stack(|| {
            context.within(input.to_owned(), child.id(), |context| lower_chain(context, child))
        }),

        None => String::new(),
    }
}

/// Traduce una entrada de valor, o retorna `default` si está vacía.
pub(crate) fn value(context: &mut Context, node: &Node, input: &str, default: Lowered) -> Lowered {
    let child = match node.value(input) {
        Some(child) => child,
        None => return default,
    };

    let slot = Slot {
        consumer: node.kind(),
        input,
    };

    ensure_sufficient_stack(|| {
        context.within(input.to_owned(), child.id(), |context| {
            trace!(kind = child.kind().as_str(), input, "expression");
            expr::lower_expr(context, child, slot)
        })
    })
}

pub(crate) fn number(context: &mut Context, node: &Node, input: &str, default: &str) -> Lowered {
    value(context, node, input, Lowered::number(default))
}

pub(crate) fn text(context: &mut Context, node: &Node, input: &str, default: &str) -> Lowered {
    value(context, node, input, Lowered::text(default))
}

pub(crate) fn boolean(context: &mut Context, node: &Node, input: &str, default: bool) -> Lowered {
    value(context, node, input, Lowered::boolean(default))
}

/// Traduce una entrada de texto que se va a mostrar en pantalla.
pub(crate) fn display(context: &mut Context, node: &Node, input: &str, default: &str) -> Lowered {
    let value = context.tentatively(|context| {
        Some(text(context, node, input, default)).filter(|value| value.kind != ValueKind::Bytes)
    });

    match value {
        Some(value) => to_display(context, value),
        None => {
            context.degrade(Degradation::ByteStreamAsValue(input.to_owned()));
            Lowered::text("")
        }
    }
}

/// Convierte cualquier valor en texto apto para un elemento de pantalla.
///
/// Los literales numéricos se citan. El resto de valores numéricos se
/// formatea en un búfer compartido, que los elementos de pantalla copian
/// al agregarse.
pub(crate) fn to_display(context: &mut Context, value: Lowered) -> Lowered {
    match value.kind {
        ValueKind::Text => value,

        ValueKind::Bytes => {
            context.degrade(Degradation::ByteStreamAsValue(value.code));
            Lowered::text("")
        }

        ValueKind::Number | ValueKind::Boolean if value.is_literal() => Lowered::text(&value.code),

        ValueKind::Number | ValueKind::Boolean => {
            let buffer = shared_buffer(context, "display_buffer", 64);
            Lowered::atom(
                format!(
                    "(snprintf({0}, sizeof({0}), \"%d\", (int)({1})), {0})",
                    buffer, value.code
                ),
                ValueKind::Text,
            )
        }
    }
}

/// Convierte un valor a número, extrayendo el primer entero si es texto.
pub(crate) fn to_number(context: &mut Context, value: Lowered) -> Lowered {
    use crate::context::Features;

    match value.kind {
        ValueKind::Text => {
            context.enable(Features::STRING_TO_NUMBER);
            Lowered::atom(
                format!("extract_number_from_string({})", value.code),
                ValueKind::Number,
            )
        }

        _ => value,
    }
}

/// Búfer de texto global, declarado la primera vez que se pide.
fn shared_buffer(context: &mut Context, name: &'static str, size: usize) -> String {
    let key = format!("buffer:{}", name);
    if let Some(existing) = context.slot(&key) {
        return existing.to_owned();
    }

    let buffer = match context.lookup(name) {
        None => name.to_owned(),
        Some(_) => context.fresh(name),
    };

    context.declare(StorageDecl::new(buffer.clone(), CType::Text(size)));
    context.remember_slot(key, buffer.clone());

    buffer
}

/// Comentario C de una línea, sin saltos que lo rompan.
pub(crate) fn comment(text: &str) -> String {
    format!("// {}\n", text.replace(|c| c == '\n' || c == '\r', " "))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Traduce un bloque de sentencia en la fase indicada.
    pub fn lower_in(phase: Phase, node: &Node) -> (Context, String) {
        let mut context = Context::new();
        let code = context.in_phase(phase, |context| lower_chain(context, node));
        (context, code)
    }

    #[test]
    fn literals_in_display_are_quoted() {
        let mut context = Context::new();
        let shown = to_display(&mut context, Lowered::number("42"));

        assert_eq!(shown.code, "\"42\"");
        assert!(context.storage().is_empty());
    }

    #[test]
    fn numbers_in_display_share_one_buffer() {
        let mut context = Context::new();
        let state = StorageDecl::new("score", CType::Int);
        context.declare(state);

        let a = to_display(&mut context, Lowered::atom("app->score", ValueKind::Number));
        let b = to_display(&mut context, Lowered::atom("app->lives", ValueKind::Number));

        assert!(a.code.contains("display_buffer"));
        assert!(b.code.contains("display_buffer"));
        let buffers = context
            .storage()
            .iter()
            .filter(|decl| decl.name.starts_with("display_buffer"))
            .count();

        assert_eq!(buffers, 1);
    }

    #[test]
    fn display_buffer_avoids_user_names() {
        let mut context = Context::new();
        context.declare(StorageDecl::new("display_buffer", CType::Int));

        let shown = to_display(&mut context, Lowered::atom("x", ValueKind::Number));
        assert!(shown.code.contains("display_buffer_0"));
    }

    #[test]
    fn chains_keep_their_location() {
        let chain = Node::new("flipper_request_redraw").followed_by(Node::new("flipper_teleport"));
        let (context, code) = lower_in(Phase::Setup, &chain);

        assert!(code.contains("view_dispatcher_send_custom_event"));
        assert!(code.contains("/* unsupported block: flipper_teleport */"));
        assert_eq!(context.degradations()[0].location().path(), "next");
    }

    #[test]
    fn loose_statements_leave_no_helpers_behind() {
        let random = Node::new("flipper_random_number");
        let loose = Node::new("flipper_sleep_ms")
            .with_value("MS", random)
            .followed_by(Node::new("flipper_manifest").with_field("APPID", "kept"));

        let mut context = Context::new();
        lower_graph(&Graph::new(vec![loose]), &mut context);

        assert!(context.features().is_empty());
        assert_eq!(context.manifests().len(), 1);
        assert_eq!(context.degradations().len(), 1);
        assert_eq!(context.degradations()[0].location().path(), "blocks[0]");
    }

    #[test]
    fn comments_stay_on_one_line() {
        assert_eq!(comment("a\nb"), "// a b\n");
    }
}
