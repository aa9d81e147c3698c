//! Resultado de una compilación.

use crate::error::Diagnostics;

/// Línea que abre cada manifiesto dentro del bloque final.
pub const MANIFEST_START: &str = "----- application.fam -----";

/// Línea que cierra cada manifiesto.
pub const MANIFEST_END: &str = "---------------------------";

/// Texto completo del programa, con sus manifiestos al final, y las
/// degradaciones que ocurrieron al producirlo.
pub struct Artifact {
    text: String,
    diagnostics: Diagnostics,
}

impl Artifact {
    pub(crate) fn new(text: String, diagnostics: Diagnostics) -> Self {
        Artifact { text, diagnostics }
    }

    /// Texto exactamente como se emitió.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Texto de C sin el bloque de manifiestos.
    pub fn source(&self) -> &str {
        match self.text.find(&format!("\n/*\n{}\n", MANIFEST_START)) {
            Some(footer) => &self.text[..footer],
            None => &self.text,
        }
    }

    pub fn manifests(&self) -> Vec<&str> {
        extract_manifests(&self.text)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

/// Extrae el cuerpo de cada manifiesto delimitado, en orden.
///
/// Los delimitadores solo cuentan cuando ocupan una línea completa. Un
/// manifiesto sin cierre se descarta.
pub fn extract_manifests(text: &str) -> Vec<&str> {
    let mut manifests = Vec::new();
    let mut offset = 0;
    let mut start = None;

    for line in text.split_inclusive('\n') {
        let end = offset + line.len();
        match (line.trim_end_matches(&['\r', '\n'][..]), start) {
            (MANIFEST_START, None) => start = Some(end),
            (MANIFEST_END, Some(body)) => {
                manifests.push(text[body..offset].trim_end_matches(&['\r', '\n'][..]));
                start = None;
            }

            _ => (),
        }

        offset = end;
    }

    manifests
}
