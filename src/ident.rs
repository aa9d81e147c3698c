//! Identificadores de C.
//!
//! Los nombres de variables provienen del usuario y pueden contener
//! espacios, acentos o coincidir con palabras reservadas. Antes de
//! emitirlos se normalizan a identificadores válidos de C.

/// Nombre que se utiliza cuando no queda nada rescatable.
pub const FALLBACK: &str = "variable";

/// Palabras reservadas de C89. La comparación ignora mayúsculas.
const RESERVED: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "int", "long", "register", "return", "short",
    "signed", "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned", "void",
    "volatile", "while",
];

/// Determina si un nombre colisiona con una palabra reservada.
pub fn is_reserved(name: &str) -> bool {
    RESERVED
        .iter()
        .any(|keyword| unicase::eq_ascii(*keyword, name))
}

/// Determina si un texto ya es un identificador de C.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }

        _ => false,
    }
}

/// Normaliza un nombre arbitrario a un identificador de C.
///
/// Un identificador válido que no es palabra reservada se preserva.
/// De lo contrario se eliminan los caracteres inválidos, se antepone
/// `var_` si el resultado no inicia con letra o guion bajo o si colisiona
/// con una palabra reservada, y un resultado vacío se reemplaza por
/// [`FALLBACK`]. La función es idempotente.
pub fn sanitize(name: &str) -> String {
    let name = name.trim();
    if is_identifier(name) && !is_reserved(name) && name != "_" {
        return name.to_owned();
    }

    let stripped: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if stripped.is_empty() || stripped == "_" {
        return String::from(FALLBACK);
    }

    let starts_well = stripped
        .chars()
        .next()
        .map(|first| first.is_ascii_alphabetic() || first == '_')
        .unwrap_or(false);

    if !starts_well || is_reserved(&stripped) {
        format!("var_{}", stripped)
    } else {
        stripped
    }
}

/// Acepta un campo solo si ya es un identificador, si no usa el valor por omisión.
///
/// Se utiliza para campos cuyo valor se emite literalmente como símbolo
/// del SDK, como alineaciones o tipos de tecla.
pub fn symbol_or<'a>(text: Option<&'a str>, default: &'a str) -> &'a str {
    match text {
        Some(text) if is_identifier(text) => text,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names_are_kept() {
        assert_eq!(sanitize("score"), "score");
        assert_eq!(sanitize("_tmp2"), "_tmp2");
        assert_eq!(sanitize("  padded  "), "padded");
    }

    #[test]
    fn invalid_characters_are_stripped() {
        assert_eq!(sanitize("my score!"), "myscore");
        assert_eq!(sanitize("año"), "ao");
    }

    #[test]
    fn leading_digits_get_a_prefix() {
        assert_eq!(sanitize("3d"), "var_3d");
        assert_eq!(sanitize("1 2 3"), "var_123");
    }

    #[test]
    fn reserved_words_get_a_prefix() {
        assert_eq!(sanitize("int"), "var_int");
        assert_eq!(sanitize("While"), "var_While");
        assert_eq!(sanitize("for!"), "var_for");
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(sanitize(""), FALLBACK);
        assert_eq!(sanitize("   "), FALLBACK);
        assert_eq!(sanitize("!!!"), FALLBACK);
        assert_eq!(sanitize("_"), FALLBACK);
    }

    #[test]
    fn sanitizing_is_idempotent() {
        for name in ["", "int", "3d", "héllo wörld", "ok", "_", "goto", "a-b-c"] {
            let once = sanitize(name);
            assert_eq!(sanitize(&once), once, "for {:?}", name);
            assert!(is_identifier(&once));
            assert!(!is_reserved(&once));
        }
    }

    #[test]
    fn symbols_fall_back_when_invalid() {
        assert_eq!(symbol_or(Some("AlignCenter"), "AlignLeft"), "AlignCenter");
        assert_eq!(symbol_or(Some("x); evil("), "AlignLeft"), "AlignLeft");
        assert_eq!(symbol_or(None, "AlignLeft"), "AlignLeft");
    }
}
