//! Errores y diagnósticos.
//!
//! La compilación en sí nunca falla: cualquier construcción que no se
//! pueda traducir se degrada a un comentario o a un valor seguro y se
//! registra como [`Degradation`]. Los únicos errores reales ocurren al
//! cargar el documento.

use crate::source::{Located, Location};
use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

/// Errores de carga del grafo.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Expected a JSON object at the document root")]
    NotAnObject,

    #[error("Malformed block document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// Construcción que se tradujo a algo más débil de lo pedido.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    #[error("Unknown block kind `{0}`, emitted a placeholder")]
    UnknownKind(String),

    #[error("Block `{0}` produces a value and cannot be used as a statement")]
    ExpressionAsStatement(String),

    #[error("Block `{0}` is a statement and cannot be used as a value")]
    StatementAsExpression(String),

    #[error("Pin `{pin}` does not support {capability}")]
    Unsupported {
        pin: String,
        capability: &'static str,
    },

    #[error("Pin `{pin}` was already configured as {previous}, ignoring {requested} setup")]
    PinConflict {
        pin: &'static str,
        previous: &'static str,
        requested: &'static str,
    },

    #[error("Block `{0}` is only meaningful inside the {1} section")]
    WrongPhase(String, &'static str),

    #[error("Top-level block `{0}` is not attached to an application and was discarded")]
    Detached(String),

    #[error("Variable `{0}` holds text and cannot be changed by a number")]
    TextArithmetic(String),

    #[error("Expected a byte stream for `{0}`")]
    ExpectedByteStream(String),

    #[error("A byte stream cannot be used as the value of `{0}`")]
    ByteStreamAsValue(String),
}

mod sealed {
    pub trait Sealed {}
}

pub trait LocatedError: sealed::Sealed {
    fn source(&self) -> &dyn Error;
    fn location(&self) -> &Location;
}

/// Conjunto de diagnósticos acumulados por una compilación.
pub struct Diagnostics {
    kind: &'static str,
    errors: Vec<Box<dyn 'static + LocatedError>>,
}

impl Diagnostics {
    pub fn kind(self, kind: &'static str) -> Self {
        Diagnostics { kind, ..self }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Mensajes sin ubicación, en orden de aparición.
    pub fn messages(&self) -> impl Iterator<Item = String> + '_ {
        self.errors.iter().map(|error| error.source().to_string())
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.errors.iter().map(|error| error.location())
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics {
            kind: "warning",
            errors: Default::default(),
        }
    }
}

impl<E: 'static + LocatedError> From<Vec<E>> for Diagnostics {
    fn from(errors: Vec<E>) -> Self {
        let errors = errors
            .into_iter()
            .map(|error| {
                let error: Box<dyn LocatedError> = Box::new(error);
                error
            })
            .collect();

        Diagnostics {
            errors,
            ..Default::default()
        }
    }
}

impl Display for Diagnostics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Diagnostics { kind, errors } = self;

        if errors.is_empty() {
            return writeln!(fmt, "No {}s were reported", kind);
        }

        for error in errors {
            writeln!(fmt, "{}: {}", kind, error.source())?;
            writeln!(fmt, " --> {}", error.location())?;
            writeln!(fmt)?;
        }

        let plural = if errors.len() == 1 { "" } else { "s" };
        writeln!(fmt, "Compiled with {} {}{}", errors.len(), kind, plural)
    }
}

impl<E: Error> sealed::Sealed for Located<E> {}

impl<E: Error> LocatedError for Located<E> {
    fn source(&self) -> &dyn Error {
        self.as_ref()
    }

    fn location(&self) -> &Location {
        Located::location(self)
    }
}
