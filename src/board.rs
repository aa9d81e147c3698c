//! Recursos físicos del dispositivo objetivo.
//!
//! Tablas de pines del conector externo, sus capacidades y los símbolos
//! del SDK que les corresponden. Un selector desconocido siempre resuelve
//! a un valor seguro; un pin conocido sin la capacidad pedida se rechaza
//! y es responsabilidad del llamador degradar.

/// Salida PWM por hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PwmOutput {
    Tim1,
    Lptim2,
}

impl PwmOutput {
    /// Identificador del canal en el SDK.
    pub fn channel(self) -> &'static str {
        match self {
            PwmOutput::Tim1 => "FuriHalPwmOutputIdTim1PA7",
            PwmOutput::Lptim2 => "FuriHalPwmOutputIdLptim2PA4",
        }
    }

    /// Prefijo de las variables de lectura de parámetros.
    pub fn state_prefix(self) -> &'static str {
        match self {
            PwmOutput::Tim1 => "pwm_pa7",
            PwmOutput::Lptim2 => "pwm_pa4",
        }
    }
}

/// Un pin del conector externo.
#[derive(Debug, PartialEq, Eq)]
pub struct Pin {
    pub name: &'static str,
    pub symbol: &'static str,
    pub adc: bool,
    pub pwm: Option<PwmOutput>,
    serial: bool,
}

const PINS: &[Pin] = &[
    Pin {
        name: "PA7",
        symbol: "&gpio_ext_pa7",
        adc: true,
        pwm: Some(PwmOutput::Tim1),
        serial: false,
    },
    Pin {
        name: "PA6",
        symbol: "&gpio_ext_pa6",
        adc: true,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "PA4",
        symbol: "&gpio_ext_pa4",
        adc: true,
        pwm: Some(PwmOutput::Lptim2),
        serial: false,
    },
    Pin {
        name: "PB3",
        symbol: "&gpio_ext_pb3",
        adc: false,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "PB2",
        symbol: "&gpio_ext_pb2",
        adc: false,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "PC3",
        symbol: "&gpio_ext_pc3",
        adc: true,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "PC1",
        symbol: "&gpio_ext_pc1",
        adc: true,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "PC0",
        symbol: "&gpio_ext_pc0",
        adc: true,
        pwm: None,
        serial: false,
    },
    Pin {
        name: "USART_TX",
        symbol: "&gpio_usart_tx",
        adc: false,
        pwm: None,
        serial: true,
    },
    Pin {
        name: "USART_RX",
        symbol: "&gpio_usart_rx",
        adc: false,
        pwm: None,
        serial: true,
    },
];

/// Pin por omisión para selectores desconocidos.
pub fn default_pin() -> &'static Pin {
    &PINS[0]
}

fn lookup(selector: Option<&str>, serial: bool) -> Option<&'static Pin> {
    let selector = selector?.trim();
    PINS.iter()
        .find(|pin| (serial || !pin.serial) && unicase::eq_ascii(pin.name, selector))
}

/// Pin de propósito general. Los pines seriales no participan.
pub fn gpio(selector: Option<&str>) -> &'static Pin {
    lookup(selector, false).unwrap_or_else(default_pin)
}

/// Pin para el sensor de distancia, que también admite los pines seriales.
pub fn ranging(selector: Option<&str>, default: &str) -> &'static Pin {
    lookup(selector, true)
        .or_else(|| lookup(Some(default), true))
        .unwrap_or_else(default_pin)
}

/// Bus I2C.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Bus {
    External,
    Power,
}

impl Bus {
    /// Solo `EXT` elige el bus externo; cualquier otro valor, o su
    /// ausencia, elige el bus interno.
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector {
            Some(selector) if unicase::eq_ascii(selector.trim(), "EXT") => Bus::External,
            _ => Bus::Power,
        }
    }

    /// Selector que recibe `_resolve_i2c_handle()`.
    pub fn index(self) -> u8 {
        match self {
            Bus::External => 0,
            Bus::Power => 1,
        }
    }
}

/// Modo de un pin digital.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
    Analog,
}

impl PinMode {
    pub fn from_selector(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            Some("OUTPUT") => PinMode::Output,
            Some("ANALOG") => PinMode::Analog,
            _ => PinMode::Input,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            PinMode::Input => "GpioModeInput",
            PinMode::Output => "GpioModeOutputPushPull",
            PinMode::Analog => "GpioModeAnalog",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            PinMode::Input => "digital input",
            PinMode::Output => "digital output",
            PinMode::Analog => "analog input",
        }
    }
}

pub fn pull_symbol(selector: Option<&str>) -> &'static str {
    match selector.map(str::trim) {
        Some("UP") => "GpioPullUp",
        Some("DOWN") => "GpioPullDown",
        _ => "GpioPullNo",
    }
}

/// Sentencia que configura un pin.
pub fn init_statement(pin: &Pin, mode: PinMode, pull: &str) -> String {
    format!(
        "furi_hal_gpio_init({}, {}, {}, GpioSpeedVeryHigh);",
        pin.symbol,
        mode.symbol(),
        pull
    )
}
