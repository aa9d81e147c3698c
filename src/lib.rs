//! Compilador de programas de bloques para Flipper Zero.
//!
//! # Entrada
//! Cada programa es un documento JSON producido por el editor de bloques.
//! El documento se carga en [`graph`], donde se convierte en un árbol de
//! nodos tipados con variables ya resueltas a su nombre visible.
//!
//! # Traducción
//! El árbol se recorre una sola vez en [`lower`]. Cada bloque se traduce a
//! fragmentos de C según la fase en la que aparece (setup, dibujo,
//! entrada, ciclo) y registra en un [`context::Context`] todo lo que el
//! programa final necesita: banderas de funcionalidad, almacenamiento,
//! configuración de pines y callbacks.
//!
//! # Ensamblado
//! Con el contexto completo, [`codegen`] emite el archivo final en un
//! orden fijo: cabeceras, rutinas auxiliares, estado de la aplicación,
//! funciones del ciclo de vida y los manifiestos `application.fam` en un
//! comentario al final.
//!
//! La compilación nunca falla por el contenido del programa. Lo que no se
//! puede traducir se degrada y queda registrado en [`error::Diagnostics`].

#[macro_use]
mod macros;

pub mod artifact;
pub mod board;
pub mod codegen;
pub mod context;
pub mod error;
pub mod graph;
pub mod ident;
pub mod ir;
pub mod lower;
pub mod source;

mod stack;

use std::fmt;

use tracing::debug;

pub use artifact::Artifact;
pub use graph::Graph;

use context::Context;
use error::Diagnostics;

/// Compila un grafo completo.
pub fn compile(graph: &Graph) -> Artifact {
    let mut text = String::new();
    let diagnostics = compile_into(graph, &mut text).unwrap_or_default();

    Artifact::new(text, diagnostics)
}

/// Compila un grafo hacia un destino arbitrario.
///
/// Cada llamada usa un contexto nuevo, por lo que compilar el mismo grafo
/// dos veces produce exactamente el mismo texto.
pub fn compile_into<W: fmt::Write>(graph: &Graph, out: &mut W) -> Result<Diagnostics, fmt::Error> {
    let mut context = Context::new();
    lower::lower_graph(graph, &mut context);
    codegen::write(&context, out)?;

    let diagnostics = context.take_diagnostics();
    debug!(degradations = diagnostics.len(), "compilation finished");

    Ok(diagnostics)
}

/// Carga y compila un documento JSON.
pub fn compile_json(source: &str) -> Result<Artifact, error::GraphError> {
    Ok(compile(&Graph::from_json(source)?))
}
