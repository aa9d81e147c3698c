//! Contexto de compilación.
//!
//! Acumulador mutable que se construye para cada compilación y que
//! recorre, por referencia exclusiva, todas las llamadas de traducción.
//! Al terminar el recorrido contiene todo lo que el ensamblador necesita:
//! banderas de funcionalidad, almacenamiento declarado, configuración de
//! recursos, sentencias diferidas y el texto de cada fase.

use std::collections::HashMap;

use bitflags::bitflags;
use tracing::warn;

use crate::{
    board::{Pin, PinMode, PwmOutput},
    codegen::manifest::ManifestSpec,
    error::{Degradation, Diagnostics},
    ir::StorageDecl,
    source::{Located, Location},
};

bitflags! {
    /// Familias de funcionalidad que el programa generado utiliza.
    ///
    /// Cada bandera activa implica exactamente una copia de la rutina
    /// auxiliar y de la cabecera asociadas.
    pub struct Features: u32 {
        const STORAGE          = 1 << 0;
        const STORAGE_READ     = 1 << 1;
        const STORAGE_WRITE    = 1 << 2;
        const STORAGE_EXISTS   = 1 << 3;
        const STORAGE_CREATE   = 1 << 4;
        const STORAGE_DELETE   = 1 << 5;
        const GPIO             = 1 << 6;
        const ADC              = 1 << 7;
        const PWM              = 1 << 8;
        const SERVO_TIM1       = 1 << 9;
        const SERVO_LPTIM      = 1 << 10;
        const TIMER            = 1 << 11;
        const RANDOM           = 1 << 12;
        const STRING_TO_NUMBER = 1 << 13;
        const ULTRASONIC       = 1 << 14;
        const DHT11            = 1 << 15;
        const NEED_5V          = 1 << 16;
        const NOTIFICATIONS    = 1 << 17;
        const MATH             = 1 << 18;
        const I2C              = 1 << 19;
        const I2C_DEVICE_READY = 1 << 20;
        const I2C_READ_REG8    = 1 << 21;
        const I2C_WRITE_REG8   = 1 << 22;
        const I2C_READ_REG16   = 1 << 23;
        const I2C_WRITE_REG16  = 1 << 24;
        const I2C_READ_MEM     = 1 << 25;
        const I2C_WRITE_MEM    = 1 << 26;

        /// Cualquier periférico que requiera la salida de 5V.
        const POWERED = Self::ULTRASONIC.bits | Self::DHT11.bits | Self::NEED_5V.bits;

        /// Cualquiera de las dos variantes de servo.
        const SERVO = Self::SERVO_TIM1.bits | Self::SERVO_LPTIM.bits;
    }
}

/// Sección del programa generado que se está traduciendo.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Setup,
    Render,
    Input,
    Loop,
    Timer,
    Button,
    Detached,
}

impl Phase {
    pub fn describe(self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Render => "draw",
            Phase::Input => "input",
            Phase::Loop => "loop",
            Phase::Timer => "timer",
            Phase::Button => "button",
            Phase::Detached => "detached",
        }
    }
}

/// Texto acumulado para cada una de las cuatro fases fijas.
#[derive(Clone, Default, Debug)]
pub struct Sections {
    pub setup: String,
    pub render: String,
    pub input: String,
    pub repeat: String,
}

/// Callback periódico declarado por el programa.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimerCallback {
    pub interval_ms: u32,
    pub body: String,
}

pub struct Context {
    emitted: Emitted,
    phase: Phase,
    path: Vec<(String, Option<String>)>,
    degradations: Vec<Located<Degradation>>,
}

/// Todo lo que una traducción deja para el ensamblador.
///
/// Se separa del resto del contexto para poder deshacerlo cuando el
/// código que lo produjo se descarta.
#[derive(Clone)]
struct Emitted {
    features: Features,
    storage: Vec<StorageDecl>,
    declared: HashMap<String, usize>,
    pins: HashMap<&'static str, PinMode>,
    init: Vec<String>,
    pwm_outputs: Vec<PwmOutput>,
    pre_render: Vec<String>,
    slots: HashMap<String, String>,
    timers: Vec<TimerCallback>,
    buttons: Vec<String>,
    manifests: Vec<ManifestSpec>,
    sections: Sections,
    counters: HashMap<&'static str, u32>,
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context {
            emitted: Emitted {
                features: Features::empty(),
                storage: Vec::new(),
                declared: HashMap::new(),
                pins: HashMap::new(),
                init: Vec::new(),
                pwm_outputs: Vec::new(),
                pre_render: Vec::new(),
                slots: HashMap::new(),
                timers: Vec::new(),
                buttons: Vec::new(),
                manifests: Vec::new(),
                sections: Sections::default(),
                counters: HashMap::new(),
            },
            phase: Phase::Detached,
            path: Vec::new(),
            degradations: Vec::new(),
        }
    }

    pub fn features(&self) -> Features {
        self.emitted.features
    }

    pub fn enable(&mut self, features: Features) {
        self.emitted.features |= features;
    }

    /// Declara almacenamiento si el nombre aún no existe.
    ///
    /// Si ya existe, la declaración original prevalece y se retorna.
    pub fn declare(&mut self, decl: StorageDecl) -> &StorageDecl {
        let index = match self.emitted.declared.get(&decl.name) {
            Some(index) => *index,
            None => {
                let index = self.emitted.storage.len();
                self.emitted.declared.insert(decl.name.clone(), index);
                self.emitted.storage.push(decl);
                index
            }
        };

        &self.emitted.storage[index]
    }

    pub fn lookup(&self, name: &str) -> Option<&StorageDecl> {
        self.emitted.declared.get(name).map(|index| &self.emitted.storage[*index])
    }

    pub fn storage(&self) -> &[StorageDecl] {
        &self.emitted.storage
    }

    /// Genera un nombre nuevo a partir de un contador local a la compilación.
    pub fn fresh(&mut self, prefix: &'static str) -> String {
        loop {
            let counter = self.emitted.counters.entry(prefix).or_insert(0);
            let name = format!("{}_{}", prefix, counter);
            *counter += 1;

            if !self.emitted.declared.contains_key(&name) {
                break name;
            }
        }
    }

    /// Configura un pin una única vez.
    ///
    /// Un pin ya configurado en otro modo conserva su configuración
    /// original y se registra el conflicto.
    pub fn configure_pin(&mut self, pin: &'static Pin, mode: PinMode, pull: &str) {
        if self.claim_pin(pin, mode) {
            self.emitted.init.push(crate::board::init_statement(pin, mode, pull));
        }
    }

    /// Registra el modo de un pin. Retorna `true` solo la primera vez.
    pub fn claim_pin(&mut self, pin: &'static Pin, mode: PinMode) -> bool {
        match self.emitted.pins.get(pin.name) {
            None => {
                self.emitted.pins.insert(pin.name, mode);
                true
            }

            Some(previous) if *previous != mode => {
                let previous = *previous;
                self.degrade(Degradation::PinConflict {
                    pin: pin.name,
                    previous: previous.describe(),
                    requested: mode.describe(),
                });

                false
            }

            Some(_) => false,
        }
    }

    /// Sentencias de inicialización de recursos, antes de la fase de setup.
    pub fn init(&self) -> &[String] {
        &self.emitted.init
    }

    pub fn use_pwm(&mut self, output: PwmOutput) {
        if !self.emitted.pwm_outputs.contains(&output) {
            self.emitted.pwm_outputs.push(output);
        }
    }

    pub fn pwm_outputs(&self) -> &[PwmOutput] {
        &self.emitted.pwm_outputs
    }

    /// Difiere una sentencia al inicio de cada redibujado, sin duplicados.
    pub fn hoist(&mut self, statement: String) {
        if !self.emitted.pre_render.contains(&statement) {
            self.emitted.pre_render.push(statement);
        }
    }

    pub fn pre_render(&self) -> &[String] {
        &self.emitted.pre_render
    }

    /// Nombre de una ranura previamente asociada a una lectura.
    pub fn slot(&self, key: &str) -> Option<&str> {
        self.emitted.slots.get(key).map(String::as_str)
    }

    pub fn remember_slot(&mut self, key: String, name: String) {
        self.emitted.slots.insert(key, name);
    }

    pub fn push_timer(&mut self, interval_ms: u32, body: String) -> usize {
        self.emitted.timers.push(TimerCallback { interval_ms, body });
        self.emitted.timers.len() - 1
    }

    pub fn timers(&self) -> &[TimerCallback] {
        &self.emitted.timers
    }

    pub fn push_button(&mut self, body: String) -> usize {
        self.emitted.buttons.push(body);
        self.emitted.buttons.len() - 1
    }

    pub fn buttons(&self) -> &[String] {
        &self.emitted.buttons
    }

    pub fn push_manifest(&mut self, spec: ManifestSpec) {
        self.emitted.manifests.push(spec);
    }

    pub fn manifests(&self) -> &[ManifestSpec] {
        &self.emitted.manifests
    }

    /// Agrega código a una de las fases fijas.
    pub fn append(&mut self, phase: Phase, code: &str) {
        let section = match phase {
            Phase::Setup => &mut self.emitted.sections.setup,
            Phase::Render => &mut self.emitted.sections.render,
            Phase::Input => &mut self.emitted.sections.input,
            Phase::Loop => &mut self.emitted.sections.repeat,
            Phase::Timer | Phase::Button | Phase::Detached => return,
        };

        section.push_str(code);
    }

    pub fn sections(&self) -> &Sections {
        &self.emitted.sections
    }

    /// Ejecuta una traducción cuyo resultado puede descartarse.
    ///
    /// Si retorna `None`, se deshacen sus efectos sobre banderas,
    /// almacenamiento, pines y listas diferidas. Las degradaciones que
    /// registró se conservan.
    pub fn tentatively<R, F>(&mut self, lower: F) -> Option<R>
    where
        F: FnOnce(&mut Self) -> Option<R>,
    {
        let checkpoint = self.emitted.clone();
        let result = lower(self);
        if result.is_none() {
            self.emitted = checkpoint;
        }

        result
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Ejecuta una traducción dentro de otra fase.
    pub fn in_phase<R, F>(&mut self, phase: Phase, lower: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        let outer = std::mem::replace(&mut self.phase, phase);
        let result = lower(self);
        self.phase = outer;

        result
    }

    /// Ejecuta una traducción un nivel más adentro en el grafo.
    pub fn within<R, F>(&mut self, segment: String, block: Option<&str>, lower: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        self.enter(segment, block);
        let result = lower(self);
        self.leave();

        result
    }

    pub fn enter(&mut self, segment: String, block: Option<&str>) {
        self.path.push((segment, block.map(str::to_owned)));
    }

    pub fn leave(&mut self) {
        self.path.pop();
    }

    pub fn location(&self) -> Location {
        let block = self.path.iter().rev().find_map(|(_, block)| block.as_deref());
        Location::new(self.path.iter().map(|(segment, _)| segment.as_str()), block)
    }

    /// Registra una degradación en la ubicación actual.
    pub fn degrade(&mut self, degradation: Degradation) {
        let location = self.location();
        warn!(%location, "{}", degradation);

        self.degradations.push(Located::at(degradation, location));
    }

    pub fn degradations(&self) -> &[Located<Degradation>] {
        &self.degradations
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        Diagnostics::from(std::mem::take(&mut self.degradations))
    }
}
