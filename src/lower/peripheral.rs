//! Bloques que acceden a periféricos.
//!
//! Cada traducción activa las banderas de las rutinas auxiliares que usa,
//! configura los pines una sola vez y difiere las lecturas costosas al
//! inicio del redibujado cuando se usan para dibujar.

use crate::{
    board::{self, Bus, PinMode, PwmOutput},
    context::{Context, Features, Phase},
    error::Degradation,
    graph::{Node, NodeKind},
    ir::{CType, Lowered, Origin, Prec, StorageDecl, ValueKind},
};

use super::{comment, display, expr::numeric, number, shared_buffer};

const DEFAULT_PATH: &str = "/ext/apps_data/app/file.txt";

const ADC_SCALE: &str = "FuriHalAdcScale2500";

/// Periodo de un servo estándar, en hercios.
const SERVO_HZ: u32 = 50;

pub fn lower_statement(context: &mut Context, node: &Node) -> String {
    use NodeKind::*;

    match node.kind() {
        StorageWrite => {
            context.enable(Features::STORAGE | Features::STORAGE_WRITE);
            let path = display(context, node, "PATH", DEFAULT_PATH);
            let data = display(context, node, "DATA", "");

            format!("storage_simple_write({}, {});\n", path.code, data.code)
        }

        StorageCreate => {
            context.enable(Features::STORAGE | Features::STORAGE_CREATE);
            let path = display(context, node, "PATH", DEFAULT_PATH);
            format!("storage_simple_create({});\n", path.code)
        }

        StorageDelete => {
            context.enable(Features::STORAGE | Features::STORAGE_DELETE);
            let path = display(context, node, "PATH", DEFAULT_PATH);
            format!("storage_simple_delete({});\n", path.code)
        }

        GpioInit => {
            let pin = board::gpio(node.field("PIN").as_deref());
            let mode = PinMode::from_selector(node.field("MODE").as_deref());
            let pull = board::pull_symbol(node.field("PULL").as_deref());

            context.enable(Features::GPIO);
            context.claim_pin(pin, mode);

            format!("{}\n", board::init_statement(pin, mode, pull))
        }

        GpioWrite => {
            let pin = board::gpio(node.field("PIN").as_deref());
            let high = node.field("STATE").as_deref() == Some("HIGH");
            context.enable(Features::GPIO);

            format!("furi_hal_gpio_write({}, {});\n", pin.symbol, high)
        }

        PwmStart | PwmSet => pwm_start(context, node),
        PwmStop | ServoUnlock => pwm_stop(context, node),
        Servo => servo(context, node),

        I2cWriteReg8 | I2cWriteReg16 => i2c_write_reg(context, node),
        I2cWriteBytes => i2c_write_bytes(context, node),
        I2cUpdateBits8 => i2c_update_bits(context, node),

        other => comment(&format!("{} is not a peripheral statement", other.as_str())),
    }
}

pub fn lower_expr(context: &mut Context, node: &Node) -> Lowered {
    use NodeKind::*;

    match node.kind() {
        StorageRead => {
            context.enable(Features::STORAGE | Features::STORAGE_READ);
            let path = display(context, node, "PATH", DEFAULT_PATH);
            let buffer = shared_buffer(context, "storage_buffer", 1024);
            let read = format!(
                "storage_simple_read({0}, sizeof({0}), {1})",
                buffer, path.code
            );

            deferred(context, read, Lowered::atom(buffer, ValueKind::Text))
        }

        StorageExists => {
            context.enable(Features::STORAGE | Features::STORAGE_EXISTS);
            let path = display(context, node, "PATH", DEFAULT_PATH);
            Lowered::atom(
                format!("storage_simple_exists({})", path.code),
                ValueKind::Boolean,
            )
        }

        GpioRead => {
            let pin = board::gpio(node.field("PIN").as_deref());
            context.enable(Features::GPIO);
            Lowered::atom(format!("furi_hal_gpio_read({})", pin.symbol), ValueKind::Boolean)
        }

        AnalogRead | Potentiometer => analog(context, node),
        PwmRead => pwm_read(context, node),

        Ultrasonic => {
            let trig = board::ranging(node.field("TRIG_PIN").as_deref(), "USART_TX");
            let echo = board::ranging(node.field("ECHO_PIN").as_deref(), "USART_RX");
            context.enable(Features::ULTRASONIC);

            Lowered::atom(
                format!("hc_sr04_measure_cm({}, {})", trig.symbol, echo.symbol),
                ValueKind::Number,
            )
        }

        PirMotion => {
            let pin = board::gpio(node.field("PIN").as_deref());
            context.enable(Features::GPIO | Features::NEED_5V);
            context.configure_pin(pin, PinMode::Input, "GpioPullNo");

            Lowered::atom(
                format!("(furi_hal_gpio_read({}) ? 1 : 0)", pin.symbol),
                ValueKind::Number,
            )
        }

        Dht11Temperature | Dht11Humidity => dht11(context, node),

        I2cDeviceReady => {
            let transfer = Transfer::new(context, node);
            context.enable(Features::I2C | Features::I2C_DEVICE_READY);

            Lowered::atom(
                format!(
                    "kb_i2c_device_ready({}, (uint8_t)({}), (uint32_t)({}))",
                    transfer.bus, transfer.addr, transfer.timeout
                ),
                ValueKind::Boolean,
            )
        }

        I2cReadReg8 | I2cReadReg16 => i2c_read_reg(context, node),
        I2cReadBytes => i2c_read_bytes(context, node),

        ByteStream => byte_stream(context, node),

        ByteStreamLength => match stream(context, node) {
            Some((array, _)) => Lowered::expr(
                format!("(int)sizeof({})", array),
                ValueKind::Number,
                Prec::Unary,
            ),

            None => Lowered::number("0"),
        },

        ByteStreamGetByte => {
            let (array, read) = match stream(context, node) {
                Some(stream) => stream,
                None => return Lowered::number("0"),
            };

            let index = numeric(context, node, "INDEX", "0");
            Lowered::atom(get_byte(&array, read, &index), ValueKind::Number)
        }

        other => {
            context.degrade(Degradation::StatementAsExpression(other.as_str().to_owned()));
            Lowered::number("0")
        }
    }
}

/// Acceso a un byte con verificación de límites.
///
/// Un índice que no es literal se evalúa una única vez.
fn get_byte(array: &str, read: Option<String>, index: &Lowered) -> String {
    match index.as_integer() {
        Some(index) => {
            let read = read.map(|read| format!("(void){}, ", read)).unwrap_or_default();
            format!(
                "({2}({1}) >= 0 && ({1}) < (int)sizeof({0}) ? {0}[{1}] : 0)",
                array, index, read
            )
        }

        None => {
            let read = read.map(|read| format!("(void){}; ", read)).unwrap_or_default();
            format!(
                "({{ {2}int _ix = (int)({1}); (_ix >= 0 && _ix < (int)sizeof({0})) ? {0}[_ix] : 0; }})",
                array, index.code, read
            )
        }
    }
}

/// Lectura con efectos colaterales cuyo resultado queda en `result`.
///
/// Al dibujar, la lectura se difiere al inicio del redibujado. En las
/// demás fases se evalúa en el sitio, antes de usar el resultado.
fn deferred(context: &mut Context, read: String, result: Lowered) -> Lowered {
    if context.phase() == Phase::Render {
        context.hoist(format!("{};", read));
        return result;
    }

    Lowered {
        code: format!("({}, {})", read, result.code),
        prec: Prec::Atomic,
        ..result
    }
}

/// Ranura escalar reutilizada por todas las lecturas con la misma clave.
fn read_slot(context: &mut Context, key: String, prefix: &'static str, ty: CType) -> StorageDecl {
    if let Some(name) = context.slot(&key) {
        if let Some(decl) = context.lookup(name) {
            return decl.clone();
        }
    }

    let name = context.fresh(prefix);
    context.remember_slot(key, name.clone());
    context.declare(StorageDecl::new(name, ty)).clone()
}

fn analog(context: &mut Context, node: &Node) -> Lowered {
    let pin = board::gpio(node.field("PIN").as_deref());
    if !pin.adc {
        context.degrade(Degradation::Unsupported {
            pin: pin.name.to_owned(),
            capability: "analog input",
        });

        return Lowered::atom("(/* no ADC channel */ 0)", ValueKind::Number);
    }

    context.enable(Features::ADC);
    context.configure_pin(pin, PinMode::Analog, "GpioPullNo");

    let (sampling, default_mode) = match node.kind() {
        NodeKind::Potentiometer => (potentiometer_sampling(node), "PERCENT"),
        _ => ("FuriHalAdcSamplingtime92_5", "RAW"),
    };

    let raw = format!(
        "adc_read_raw_on_gpio({}, {}, FuriHalAdcClockSync64, FuriHalAdcOversample64, {})",
        pin.symbol, ADC_SCALE, sampling
    );

    let code = match node.field_or("MODE", default_mode).as_str() {
        "MV" => format!("adc_raw_to_mv_scale({}, {})", raw, ADC_SCALE),
        "PERCENT" if *node.kind() == NodeKind::Potentiometer => {
            format!("((int)(({} * 100UL) / 4095UL))", raw)
        }
        _ => format!("({})", raw),
    };

    Lowered::atom(code, ValueKind::Number)
}

/// Tiempo de muestreo según la impedancia del divisor.
fn potentiometer_sampling(node: &Node) -> &'static str {
    let value = node.number_field("R_VALUE").unwrap_or(10.0);
    let multiplier = match node.field("R_UNIT").as_deref() {
        Some("OHM") => 1.0,
        Some("MOHM") => 1_000_000.0,
        _ => 1_000.0,
    };

    let ohms = value * multiplier;
    if ohms <= 10_000.0 {
        "FuriHalAdcSamplingtime24_5"
    } else if ohms <= 50_000.0 {
        "FuriHalAdcSamplingtime92_5"
    } else {
        "FuriHalAdcSamplingtime247_5"
    }
}

/// Salida PWM del pin elegido, o la degradación si no tiene.
fn pwm_output(context: &mut Context, node: &Node, capability: &'static str) -> Option<PwmOutput> {
    let pin = board::gpio(node.field("PIN").as_deref());
    if pin.pwm.is_none() {
        context.degrade(Degradation::Unsupported {
            pin: pin.name.to_owned(),
            capability,
        });
    }

    pin.pwm
}

/// Variables que recuerdan los últimos parámetros de una salida.
fn pwm_state(context: &mut Context, output: PwmOutput) -> (String, String) {
    let prefix = output.state_prefix();
    let freq = context.declare(StorageDecl::new(format!("{}_freq", prefix), CType::U32));
    let freq = freq.place();
    let duty = context.declare(StorageDecl::new(format!("{}_duty", prefix), CType::U8));

    (freq, duty.place())
}

fn pwm_start(context: &mut Context, node: &Node) -> String {
    let pin = node.field_or("PIN", "PA7");
    let label = match node.kind() {
        NodeKind::PwmSet => "PWM set",
        _ => "PWM start",
    };

    let output = match pwm_output(context, node, "hardware PWM") {
        Some(output) => output,
        None => return comment(&format!("{}: unsupported pin {} (use PA7 or PA4)", label, pin)),
    };

    let freq = numeric(context, node, "FREQ", "1000");
    let duty = numeric(context, node, "DUTY", "50");

    context.enable(Features::PWM);
    context.use_pwm(output);
    let (freq_state, duty_state) = pwm_state(context, output);
    let channel = output.channel();

    format!(
        "{{\n    \
            uint32_t _f = (uint32_t)({freq});\n    \
            if(_f == 0) _f = 1;\n    \
            int _d = (int)({duty});\n    \
            if(_d < 0) _d = 0;\n    \
            if(_d > 100) _d = 100;\n    \
            if(furi_hal_pwm_is_running({channel})) {{\n        \
                furi_hal_pwm_set_params({channel}, _f, (uint8_t)_d);\n    \
            }} else {{\n        \
                furi_hal_pwm_start({channel}, _f, (uint8_t)_d);\n    \
            }}\n    \
            {freq_state} = _f;\n    \
            {duty_state} = (uint8_t)_d;\n\
        }}\n",
        freq = freq.code,
        duty = duty.code,
        channel = channel,
        freq_state = freq_state,
        duty_state = duty_state,
    )
}

fn pwm_stop(context: &mut Context, node: &Node) -> String {
    let pin = node.field_or("PIN", "PA7");
    let capability = match node.kind() {
        NodeKind::ServoUnlock => "servo control",
        _ => "hardware PWM",
    };

    match pwm_output(context, node, capability) {
        Some(output) => {
            context.enable(Features::PWM);
            format!(
                "if(furi_hal_pwm_is_running({0})) {{\n    furi_hal_pwm_stop({0});\n}}\n",
                output.channel()
            )
        }

        None if *node.kind() == NodeKind::ServoUnlock => {
            comment(&format!("Servo unlock: pin {} not supported (only PA7/PA4)", pin))
        }

        None => comment(&format!("PWM stop: unsupported pin {} (use PA7 or PA4)", pin)),
    }
}

fn pwm_read(context: &mut Context, node: &Node) -> Lowered {
    let output = match pwm_output(context, node, "hardware PWM") {
        Some(output) => output,
        None => return Lowered::number("0"),
    };

    let (freq, duty) = pwm_state(context, output);
    let place = match node.field("WHAT").as_deref() {
        Some("FREQ") => freq,
        _ => duty,
    };

    Lowered::atom(place, ValueKind::Number)
}

fn servo(context: &mut Context, node: &Node) -> String {
    let pin = node.field_or("PIN", "PA7");
    let output = match pwm_output(context, node, "servo control") {
        Some(output) => output,
        None => {
            return comment(&format!(
                "ERROR: Pin {} does not support hardware PWM for servo control (supported: PA7, PA4)",
                pin
            ))
        }
    };

    let angle = numeric(context, node, "ANGLE", "90");

    context.enable(Features::PWM);
    context.use_pwm(output);
    let channel = output.channel();

    let update = match output {
        PwmOutput::Tim1 => {
            context.enable(Features::SERVO_TIM1);
            format!(
                "    servo_custom_pwm_set_params({}, servo_angle_to_compare((uint8_t)_angle));\n",
                SERVO_HZ
            )
        }

        PwmOutput::Lptim2 => {
            context.enable(Features::SERVO_LPTIM);
            format!(
                "    uint32_t _period = LL_LPTIM_GetAutoReload(LPTIM2);\n    \
                 if(_period == 0) {{\n        \
                     furi_hal_pwm_set_params({channel}, {hz}, 7);\n        \
                     _period = LL_LPTIM_GetAutoReload(LPTIM2);\n    \
                 }}\n    \
                 servo_lptim2_set_params({hz}, servo_angle_to_lptim_compare((uint8_t)_angle, _period));\n",
                channel = channel,
                hz = SERVO_HZ,
            )
        }
    };

    format!(
        "{{\n    \
            int _angle = (int)({angle});\n    \
            if(_angle < 0) _angle = 0;\n    \
            if(_angle > 180) _angle = 180;\n    \
            if(!furi_hal_pwm_is_running({channel})) {{\n        \
                furi_hal_pwm_start({channel}, {hz}, 7);\n    \
            }}\n\
            {update}\
        }}\n",
        angle = angle.code,
        channel = channel,
        hz = SERVO_HZ,
        update = update,
    )
}

fn dht11(context: &mut Context, node: &Node) -> Lowered {
    let pin = board::gpio(node.field("PIN").as_deref());
    let (reader, prefix, kind) = match node.kind() {
        NodeKind::Dht11Humidity => ("dht11_read_humidity_percent", "dht11_hum", "hum"),
        _ => ("dht11_read_temperature_c", "dht11_temp", "temp"),
    };

    context.enable(Features::DHT11 | Features::NEED_5V);

    let key = format!("dht11:{}:{}", kind, pin.name);
    let slot = read_slot(context, key, prefix, CType::Int);
    let place = slot.place();
    let read = format!("{} = {}({})", place, reader, pin.symbol);

    deferred(context, read, Lowered::atom(place, ValueKind::Number))
}

/// Argumentos comunes de una transacción I2C.
struct Transfer {
    bus: u8,
    addr: String,
    timeout: String,
}

impl Transfer {
    fn new(context: &mut Context, node: &Node) -> Self {
        let bus = Bus::from_selector(node.field("BUS").as_deref()).index();
        let addr = numeric(context, node, "ADDR", "0x00").code;
        let timeout = numeric(context, node, "TIMEOUT", "50").code;

        Transfer { bus, addr, timeout }
    }
}

fn i2c_read_reg(context: &mut Context, node: &Node) -> Lowered {
    let transfer = Transfer::new(context, node);
    let reg = numeric(context, node, "REG", "0x00");

    let (function, prefix, ty, flag) = match node.kind() {
        NodeKind::I2cReadReg16 => ("kb_i2c_read_reg16", "i2c_reg16", CType::U16, Features::I2C_READ_REG16),
        _ => ("kb_i2c_read_reg8", "i2c_reg8", CType::U8, Features::I2C_READ_REG8),
    };

    context.enable(Features::I2C | flag);

    let key = format!(
        "{}:{}:{}:{}:{}",
        prefix, transfer.bus, transfer.addr, reg.code, transfer.timeout
    );
    let slot = read_slot(context, key, prefix, ty);
    let place = slot.place();

    let read = format!(
        "{}({}, (uint8_t)({}), (uint8_t)({}), &{}, (uint32_t)({}))",
        function, transfer.bus, transfer.addr, reg.code, place, transfer.timeout
    );

    deferred(context, read, Lowered::atom(place, ValueKind::Number))
}

fn i2c_write_reg(context: &mut Context, node: &Node) -> String {
    let transfer = Transfer::new(context, node);
    let reg = numeric(context, node, "REG", "0x00");
    let value = numeric(context, node, "VALUE", "0");

    let (function, cast, flag) = match node.kind() {
        NodeKind::I2cWriteReg16 => ("kb_i2c_write_reg16", "uint16_t", Features::I2C_WRITE_REG16),
        _ => ("kb_i2c_write_reg8", "uint8_t", Features::I2C_WRITE_REG8),
    };

    context.enable(Features::I2C | flag);

    format!(
        "{}({}, (uint8_t)({}), (uint8_t)({}), ({})({}), (uint32_t)({}));\n",
        function, transfer.bus, transfer.addr, reg.code, cast, value.code, transfer.timeout
    )
}

fn i2c_read_bytes(context: &mut Context, node: &Node) -> Lowered {
    let transfer = Transfer::new(context, node);
    let mem = numeric(context, node, "MEM", "0x00");
    let len = number(context, node, "LEN", "1").as_integer().unwrap_or(1).clamp(1, 64) as usize;

    context.enable(Features::I2C | Features::I2C_READ_MEM);

    let key = format!(
        "i2c_read_bytes:{}:{}:{}:{}:{}",
        transfer.bus, transfer.addr, mem.code, len, transfer.timeout
    );

    let array = match context.slot(&key) {
        Some(array) => array.to_owned(),
        None => {
            let array = context.fresh("i2c_read_bytes");
            context.declare(StorageDecl::new(array.clone(), CType::Bytes { len, init: None }));
            context.remember_slot(key, array.clone());
            array
        }
    };

    let read = format!(
        "kb_i2c_read_mem_bytes({}, (uint8_t)({}), (uint8_t)({}), {}, {}, (uint32_t)({}))",
        transfer.bus, transfer.addr, mem.code, array, len, transfer.timeout
    );

    let result = Lowered {
        code: array.clone(),
        kind: ValueKind::Bytes,
        prec: Prec::Atomic,
        origin: Origin::Array(array),
    };

    deferred(context, read, result)
}

fn i2c_write_bytes(context: &mut Context, node: &Node) -> String {
    let (array, read) = match stream_input(context, node, "DATA") {
        Some(stream) => stream,
        None => return comment("I2C write bytes: DATA is not a byte stream"),
    };

    let transfer = Transfer::new(context, node);
    let mem = numeric(context, node, "MEM", "0x00");

    context.enable(Features::I2C | Features::I2C_WRITE_MEM);

    let read = read.map(|read| format!("{};\n", read)).unwrap_or_default();
    format!(
        "{0}kb_i2c_write_mem_bytes({1}, (uint8_t)({2}), (uint8_t)({3}), {4}, sizeof({4}), (uint32_t)({5}));\n",
        read, transfer.bus, transfer.addr, mem.code, array, transfer.timeout
    )
}

fn i2c_update_bits(context: &mut Context, node: &Node) -> String {
    let transfer = Transfer::new(context, node);
    let reg = numeric(context, node, "REG", "0x00");
    let mask = numeric(context, node, "MASK", "0");
    let value = numeric(context, node, "VALUE", "0");

    context.enable(Features::I2C | Features::I2C_READ_REG8 | Features::I2C_WRITE_REG8);

    let target = format!(
        "{}, (uint8_t)({}), (uint8_t)({})",
        transfer.bus, transfer.addr, reg.code
    );

    format!(
        "{{\n    \
            uint8_t _tmp;\n    \
            if(kb_i2c_read_reg8({target}, &_tmp, (uint32_t)({timeout}))) {{\n        \
                uint8_t _m = (uint8_t)({mask});\n        \
                if(_m) {{\n            \
                    uint8_t _v = (uint8_t)({value});\n            \
                    uint8_t _shift = 0;\n            \
                    uint8_t _t = _m;\n            \
                    while((_t & 1u) == 0u) {{\n                \
                        _t >>= 1;\n                \
                        _shift++;\n            \
                    }}\n            \
                    _v = (uint8_t)((_v << _shift) & _m);\n            \
                    _tmp = (uint8_t)((_tmp & (uint8_t)(~_m)) | _v);\n            \
                    kb_i2c_write_reg8({target}, _tmp, (uint32_t)({timeout}));\n        \
                }}\n    \
            }}\n\
        }}\n",
        target = target,
        timeout = transfer.timeout,
        mask = mask.code,
        value = value.code,
    )
}

fn byte_stream(context: &mut Context, node: &Node) -> Lowered {
    let raw = node.raw_field("BYTES");
    let mut bytes: Vec<u8> = raw
        .split_whitespace()
        .filter_map(|token| {
            let digits = token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
                .unwrap_or(token);

            u8::from_str_radix(digits, 16).ok()
        })
        .collect();

    if bytes.is_empty() {
        bytes.push(0);
    }

    let array = context.fresh("byte_stream");
    let len = bytes.len();
    context.declare(StorageDecl::new(
        array.clone(),
        CType::Bytes {
            len,
            init: Some(bytes),
        },
    ));

    Lowered {
        code: array.clone(),
        kind: ValueKind::Bytes,
        prec: Prec::Atomic,
        origin: Origin::Array(array),
    }
}

/// Arreglo detrás de la entrada `STREAM`.
fn stream(context: &mut Context, node: &Node) -> Option<(String, Option<String>)> {
    stream_input(context, node, "STREAM")
}

/// Nombre del arreglo de una entrada de bytes y, si la lectura no se
/// difirió, la expresión que lo llena.
///
/// Si la entrada no es un arreglo, lo que registró su traducción se deshace.
fn stream_input(context: &mut Context, node: &Node, input: &str) -> Option<(String, Option<String>)> {
    let stream = context.tentatively(|context| {
        let value = number(context, node, input, "0");
        match value.origin {
            Origin::Array(array) => {
                let read = if value.code == array { None } else { Some(value.code) };
                Some((array, read))
            }

            _ => None,
        }
    });

    if stream.is_none() {
        context.degrade(Degradation::ExpectedByteStream(input.to_owned()));
    }

    stream
}
