//! Manifiesto de compilación (`application.fam`).

use std::fmt::{self, Write};

use crate::graph::{format_number, Node};

/// Punto de entrada fijo del programa generado.
pub const ENTRY_POINT: &str = "app_main";

#[derive(Clone, Debug, PartialEq)]
pub struct ManifestSpec {
    pub app_id: String,
    pub name: String,
    pub apptype: String,
    pub icon: Option<String>,
    pub stack: Option<u32>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

impl ManifestSpec {
    /// Extrae la especificación de un bloque de manifiesto.
    pub fn from_node(node: &Node) -> Self {
        let apptype = node.field_or("APPTYPE", "FlipperAppType.EXTERNAL");
        let apptype = if is_apptype(&apptype) {
            apptype
        } else {
            String::from("FlipperAppType.EXTERNAL")
        };

        let stack = node
            .number_field("STACK")
            .unwrap_or(4096.0)
            .max(0.0)
            .min(u32::MAX.into()) as u32;

        ManifestSpec {
            app_id: node.field_or("APPID", "my_app"),
            name: node.field_or("NAME", "My App"),
            apptype,
            icon: node.field("ICON"),
            stack: Some(stack).filter(|stack| *stack > 0),
            category: Some(node.field_or("CATEGORY", "General")),
            author: Some(node.field_or("AUTHOR", "Unknown")),
            version: Some(node.field_or("VERSION", "0.1.0")),
            description: Some(node.field_or("DESCRIPTION", "Generated from blocks")),
        }
    }
}

fn is_apptype(text: &str) -> bool {
    !text.is_empty()
        && text
            .split('.')
            .all(|part| crate::ident::is_identifier(part))
}

fn quoted(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");

    // El manifiesto viaja dentro de un comentario de C
    let escaped = escaped.replace('\n', " ").replace("*/", "* /");
    format!("\"{}\"", escaped)
}

/// Escribe un manifiesto en formato `application.fam`.
///
/// El orden de los campos es fijo y solo se emiten los que tienen valor.
pub fn render<W: Write>(spec: &ManifestSpec, output: &mut W) -> fmt::Result {
    let optional = |value: &Option<String>| value.as_deref().filter(|value| !value.is_empty()).map(quoted);

    emit!(output, "App(")?;
    emit!(output, 1; "appid={},", quoted(&spec.app_id))?;

    if !spec.name.is_empty() {
        emit!(output, 1; "name={},", quoted(&spec.name))?;
    }

    emit!(output, 1; "apptype={},", spec.apptype)?;
    emit!(output, 1; "entry_point={},", quoted(ENTRY_POINT))?;

    if let Some(icon) = optional(&spec.icon) {
        emit!(output, 1; "fap_icon={},", icon)?;
    }

    if let Some(stack) = spec.stack {
        emit!(output, 1; "stack_size={},", format_number(stack.into()))?;
    }

    let tail = [
        ("fap_category", &spec.category),
        ("fap_author", &spec.author),
        ("fap_version", &spec.version),
        ("fap_description", &spec.description),
    ];

    for (key, value) in tail {
        if let Some(value) = optional(value) {
            emit!(output, 1; "{}={},", key, value)?;
        }
    }

    write!(output, ")")
}
