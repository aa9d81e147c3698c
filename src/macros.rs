/// Declara el catálogo cerrado de clases de bloque.
///
/// Cada variante se asocia con el nombre exacto que utiliza el editor al
/// serializar. Cualquier otro nombre se preserva en `Unknown` para que el
/// compilador pueda degradar en vez de fallar.
macro_rules! node_kinds {
    ($($variant:ident => $name:literal),* $(,)?) => {
        /// Clase de un bloque.
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub enum NodeKind {
            $($variant,)*

            /// Clase desconocida, posiblemente de una versión futura del editor.
            Unknown(String),
        }

        impl NodeKind {
            /// Nombre serializado de la clase.
            pub fn as_str(&self) -> &str {
                match self {
                    $(NodeKind::$variant => $name,)*
                    NodeKind::Unknown(name) => name,
                }
            }
        }

        impl std::str::FromStr for NodeKind {
            type Err = std::convert::Infallible;

            fn from_str(string: &str) -> Result<Self, Self::Err> {
                Ok(match string {
                    $($name => NodeKind::$variant,)*
                    other => NodeKind::Unknown(other.to_owned()),
                })
            }
        }
    };
}

/// Emite una línea de código C.
///
/// La forma `emit!(out, n; ...)` antepone `n` niveles de sangría.
macro_rules! emit {
    ($out:expr) => {
        writeln!($out)
    };

    ($out:expr, $depth:literal; $($format:tt)*) => {{
        write!($out, "{:width$}", "", width = 4 * $depth)?;
        writeln!($out, $($format)*)
    }};

    ($out:expr, $($format:tt)*) => {
        writeln!($out, $($format)*)
    };
}
