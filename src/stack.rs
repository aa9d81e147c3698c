//! Crecimiento de pila para recorridos profundos.
//!
//! Los programas de bloques pueden anidar sentencias y expresiones sin
//! límite práctico. Cada paso recursivo de la carga y de la traducción
//! pasa por [`ensure_sufficient_stack`], que reserva una pila nueva cuando
//! la actual se acerca a su fin.

/// Si queda menos que esto, se reserva más pila.
const RED_ZONE: usize = 100 * 1024;

/// Tamaño de cada segmento nuevo.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
