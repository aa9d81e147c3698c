//! Rastreo de ubicaciones dentro del grafo de bloques.
//!
//! El grafo no tiene líneas ni columnas. En su lugar, cada bloque se
//! identifica por la ruta de entradas que hay que seguir desde la raíz
//! para llegar a él, por ejemplo `blocks[0] > SETUP > next > DO0`, y
//! opcionalmente por el identificador que le asigna el editor.

use std::{
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

/// Valor acompañado del bloque que lo originó.
#[derive(Debug, Clone)]
pub struct Located<T> {
    location: Location,
    value: T,
}

impl<T> Located<T> {
    pub fn at(value: T, location: Location) -> Self {
        Located { value, location }
    }

    pub fn val(&self) -> &T {
        &self.value
    }

    pub fn location(&self) -> &Location {
        &self.location
    }
}

impl<T> AsRef<T> for Located<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

/// Ruta hacia un bloque y su identificador de editor, si tiene.
#[derive(Clone, PartialEq, Eq)]
pub struct Location {
    path: Rc<str>,
    block: Option<Rc<str>>,
}

impl Location {
    /// Construye una ubicación a partir de los segmentos de la ruta.
    pub fn new<'a, I>(segments: I, block: Option<&str>) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let path = segments.into_iter().collect::<Vec<_>>().join(" > ");
        Location {
            path: path.into(),
            block: block.map(Rc::from),
        }
    }

    /// Ubicación del documento completo.
    pub fn root() -> Self {
        Location::new(std::iter::empty(), None)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn block(&self) -> Option<&str> {
        self.block.as_deref()
    }
}

impl Display for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            formatter.write_str("<workspace>")?;
        } else {
            formatter.write_str(&self.path)?;
        }

        match &self.block {
            Some(block) => write!(formatter, " (block {})", block),
            None => Ok(()),
        }
    }
}

impl Debug for Location {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        <Self as Display>::fmt(self, formatter)
    }
}
