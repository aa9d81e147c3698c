//! Cabeceras y rutinas auxiliares condicionadas por banderas.
//!
//! Cada entrada de las tablas declara la bandera que la habilita. Una
//! entrada se emite una sola vez si alguna de sus banderas está activa, y
//! nunca si ninguna lo está. Las entradas sin bandera siempre se emiten.

use std::fmt::{self, Write};

use crate::context::Features;

/// Texto emitido solo si su condición se cumple.
pub struct Gated {
    pub gate: Features,
    pub name: &'static str,
    pub code: &'static str,
}

impl Gated {
    pub fn is_enabled(&self, features: Features) -> bool {
        self.gate.is_empty() || features.intersects(self.gate)
    }
}

const fn always(header: &'static str) -> Gated {
    Gated {
        gate: Features::empty(),
        name: header,
        code: header,
    }
}

const fn header(gate: Features, header: &'static str) -> Gated {
    Gated {
        gate,
        name: header,
        code: header,
    }
}

pub const INCLUDES: &[Gated] = &[
    always("furi.h"),
    always("furi_hal.h"),
    header(Features::ADC, "furi_hal_adc.h"),
    header(Features::ADC, "furi_hal_resources.h"),
    header(Features::I2C, "furi_hal_i2c.h"),
    always("gui/gui.h"),
    always("gui/view_dispatcher.h"),
    always("gui/modules/widget.h"),
    always("input/input.h"),
    header(Features::STORAGE, "storage/storage.h"),
    always("string.h"),
    always("stdio.h"),
    always("stdlib.h"),
    always("stdint.h"),
    header(Features::MATH, "math.h"),
    header(Features::NOTIFICATIONS, "notification/notification.h"),
    header(Features::NOTIFICATIONS, "notification/notification_messages.h"),
    header(Features::PWM, "furi_hal_pwm.h"),
    header(Features::SERVO_TIM1, "stm32wbxx_ll_tim.h"),
    header(Features::SERVO_LPTIM, "stm32wbxx_ll_lptim.h"),
    header(Features::SERVO, "stm32wbxx_ll_rcc.h"),
    header(Features::POWERED, "furi_hal_power.h"),
    always("furi/core/log.h"),
];

pub const HELPERS: &[Gated] = &[
    Gated {
        gate: Features::STORAGE_READ,
        name: "storage_simple_read",
        code: r#"static bool storage_simple_read(char* buffer, size_t buffer_size, const char* path) {
    Storage* storage = furi_record_open(RECORD_STORAGE);
    File* file = storage_file_alloc(storage);
    bool success = false;

    if(storage_file_open(file, path, FSAM_READ, FSOM_OPEN_EXISTING)) {
        size_t bytes_read = storage_file_read(file, buffer, buffer_size - 1);
        buffer[bytes_read] = '\0';
        success = true;
    } else {
        buffer[0] = '\0';
    }

    storage_file_close(file);
    storage_file_free(file);
    furi_record_close(RECORD_STORAGE);
    return success;
}
"#,
    },
    Gated {
        gate: Features::STORAGE_WRITE,
        name: "storage_simple_write",
        code: r#"static bool storage_simple_write(const char* path, const char* data) {
    Storage* storage = furi_record_open(RECORD_STORAGE);
    File* file = storage_file_alloc(storage);
    bool success = false;

    if(storage_file_open(file, path, FSAM_WRITE, FSOM_CREATE_ALWAYS)) {
        size_t length = strlen(data);
        success = storage_file_write(file, data, length) == length;
    }

    storage_file_close(file);
    storage_file_free(file);
    furi_record_close(RECORD_STORAGE);
    return success;
}
"#,
    },
    Gated {
        gate: Features::STORAGE_EXISTS,
        name: "storage_simple_exists",
        code: r#"static bool storage_simple_exists(const char* path) {
    Storage* storage = furi_record_open(RECORD_STORAGE);
    bool exists = storage_file_exists(storage, path);
    furi_record_close(RECORD_STORAGE);
    return exists;
}
"#,
    },
    Gated {
        gate: Features::STORAGE_CREATE,
        name: "storage_simple_create",
        code: r#"static bool storage_simple_create(const char* path) {
    Storage* storage = furi_record_open(RECORD_STORAGE);
    File* file = storage_file_alloc(storage);
    bool success = storage_file_open(file, path, FSAM_WRITE, FSOM_CREATE_ALWAYS);

    storage_file_close(file);
    storage_file_free(file);
    furi_record_close(RECORD_STORAGE);
    return success;
}
"#,
    },
    Gated {
        gate: Features::STORAGE_DELETE,
        name: "storage_simple_delete",
        code: r#"static bool storage_simple_delete(const char* path) {
    Storage* storage = furi_record_open(RECORD_STORAGE);
    bool success = storage_simply_remove(storage, path);
    furi_record_close(RECORD_STORAGE);
    return success;
}
"#,
    },
    Gated {
        gate: Features::RANDOM,
        name: "random_range",
        code: r#"// Uniform integer in [min, max], rejecting draws that would bias the modulo
static int random_range(int min, int max) {
    if(min > max) {
        int swap = min;
        min = max;
        max = swap;
    }

    if(min == max) {
        return min;
    }

    uint32_t range = (uint32_t)(max - min + 1);
    uint32_t limit = UINT32_MAX - (UINT32_MAX % range);
    uint32_t draw;

    do {
        draw = furi_hal_random_get();
    } while(draw >= limit);

    return min + (int)(draw % range);
}
"#,
    },
    Gated {
        gate: Features::STRING_TO_NUMBER,
        name: "extract_number_from_string",
        code: r#"// First run of digits in the text, or 0 if there is none
static int extract_number_from_string(const char* str) {
    if(!str) return 0;

    while(*str && (*str < '0' || *str > '9')) {
        str++;
    }

    if(!*str) return 0;
    return atoi(str);
}
"#,
    },
    Gated {
        gate: Features::ADC,
        name: "adc_read_raw_on_gpio",
        code: r#"static FuriHalAdcChannel adc_channel_for_gpio(const GpioPin* pin) {
    int32_t number = furi_hal_resources_get_ext_pin_number(pin);
    if(number < 0) return FuriHalAdcChannelNone;

    const GpioPinRecord* record = furi_hal_resources_pin_by_number((uint8_t)number);
    return record ? record->channel : FuriHalAdcChannelNone;
}

static uint16_t adc_read_raw_on_channel(
    FuriHalAdcChannel channel,
    FuriHalAdcScale scale,
    FuriHalAdcClock clock,
    FuriHalAdcOversample oversample,
    FuriHalAdcSamplingTime sampling) {
    if(channel == FuriHalAdcChannelNone) return 0;

    FuriHalAdcHandle* handle = furi_hal_adc_acquire();
    furi_hal_adc_configure_ex(handle, scale, clock, oversample, sampling);
    uint16_t raw = furi_hal_adc_read(handle, channel);
    furi_hal_adc_release(handle);
    return raw;
}

static uint16_t adc_read_raw_on_gpio(
    const GpioPin* pin,
    FuriHalAdcScale scale,
    FuriHalAdcClock clock,
    FuriHalAdcOversample oversample,
    FuriHalAdcSamplingTime sampling) {
    return adc_read_raw_on_channel(adc_channel_for_gpio(pin), scale, clock, oversample, sampling);
}

static inline int adc_raw_to_mv_scale(uint16_t raw, FuriHalAdcScale scale) {
    const int scale_mv = (scale == FuriHalAdcScale2500) ? 2500 : 2048;
    int mv = (int)((raw * (long)scale_mv) / 4095L);
    if(mv < 0) mv = 0;
    if(mv > scale_mv) mv = scale_mv;
    return mv;
}
"#,
    },
    Gated {
        gate: Features::POWERED,
        name: "power_ensure_5v",
        code: r#"// External sensors are powered from the 5V header
static void power_ensure_5v(void) {
    if(!furi_hal_power_is_otg_enabled() && !furi_hal_power_is_charging()) {
        furi_hal_power_enable_otg();
    }
}
"#,
    },
    Gated {
        gate: Features::ULTRASONIC,
        name: "hc_sr04_measure_cm",
        code: r#"static inline void cycle_counter_enable(void) {
    if(!(DWT->CTRL & DWT_CTRL_CYCCNTENA_Msk)) {
        CoreDebug->DEMCR |= CoreDebug_DEMCR_TRCENA_Msk;
        DWT->CYCCNT = 0;
        DWT->CTRL |= DWT_CTRL_CYCCNTENA_Msk;
    }
}

static inline float hc_sr04_us_to_cm(uint32_t us) {
    return (float)us / 58.0f;
}

// Distance in centimeters, or -1 on timeout
static float hc_sr04_measure_cm(const GpioPin* trig, const GpioPin* echo) {
    power_ensure_5v();
    cycle_counter_enable();

    bool serial_pins = (trig == &gpio_usart_tx) || (trig == &gpio_usart_rx) ||
                       (echo == &gpio_usart_tx) || (echo == &gpio_usart_rx);
    FuriHalSerialHandle* serial = NULL;
    if(serial_pins) {
        serial = furi_hal_serial_control_acquire(FuriHalSerialIdUsart);
    }

    furi_hal_gpio_write(trig, false);
    furi_hal_gpio_init(trig, GpioModeOutputPushPull, GpioPullNo, GpioSpeedVeryHigh);
    furi_hal_gpio_init(echo, GpioModeInput, GpioPullNo, GpioSpeedVeryHigh);

    const uint32_t timeout_ms = 50;
    float cm = -1.0f;

    furi_hal_gpio_write(trig, true);
    furi_delay_us(10);
    furi_hal_gpio_write(trig, false);

    const uint32_t start = furi_get_tick();
    while((furi_get_tick() - start) < timeout_ms && !furi_hal_gpio_read(echo)) {
    }

    if(furi_hal_gpio_read(echo)) {
        const uint32_t pulse_start = DWT->CYCCNT;
        while((furi_get_tick() - start) < timeout_ms && furi_hal_gpio_read(echo)) {
        }
        const uint32_t pulse_end = DWT->CYCCNT;

        uint32_t us = (pulse_end - pulse_start) / furi_hal_cortex_instructions_per_microsecond();
        cm = hc_sr04_us_to_cm(us);
    }

    if(serial_pins) {
        furi_hal_gpio_init_ex(
            &gpio_usart_tx, GpioModeAltFunctionPushPull, GpioPullUp, GpioSpeedVeryHigh, GpioAltFn7USART1);
        furi_hal_gpio_init_ex(
            &gpio_usart_rx, GpioModeAltFunctionPushPull, GpioPullUp, GpioSpeedVeryHigh, GpioAltFn7USART1);
        if(serial) furi_hal_serial_control_release(serial);
    }

    return cm;
}
"#,
    },
    Gated {
        gate: Features::I2C,
        name: "_resolve_i2c_handle",
        code: r#"// Bus 0 is the external header (PC0 SCL, PC1 SDA), bus 1 the internal power bus
static inline const FuriHalI2cBusHandle* _resolve_i2c_handle(int bus) {
    return bus == 0 ? &furi_hal_i2c_handle_external : &furi_hal_i2c_handle_power;
}
"#,
    },
    Gated {
        gate: Features::I2C_READ_REG8,
        name: "kb_i2c_read_reg8",
        code: r#"static bool kb_i2c_read_reg8(int bus, uint8_t addr7, uint8_t reg, uint8_t* out, uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_read_reg_8(handle, (uint8_t)(addr7 << 1), reg, out, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_WRITE_REG8,
        name: "kb_i2c_write_reg8",
        code: r#"static bool kb_i2c_write_reg8(int bus, uint8_t addr7, uint8_t reg, uint8_t value, uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_write_reg_8(handle, (uint8_t)(addr7 << 1), reg, value, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_READ_REG16,
        name: "kb_i2c_read_reg16",
        code: r#"static bool kb_i2c_read_reg16(int bus, uint8_t addr7, uint8_t reg, uint16_t* out, uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_read_reg_16(handle, (uint8_t)(addr7 << 1), reg, out, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_WRITE_REG16,
        name: "kb_i2c_write_reg16",
        code: r#"static bool kb_i2c_write_reg16(int bus, uint8_t addr7, uint8_t reg, uint16_t value, uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_write_reg_16(handle, (uint8_t)(addr7 << 1), reg, value, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_WRITE_MEM,
        name: "kb_i2c_write_mem_bytes",
        code: r#"static bool kb_i2c_write_mem_bytes(
    int bus,
    uint8_t addr7,
    uint8_t start,
    const uint8_t* data,
    size_t length,
    uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_write_mem(handle, (uint8_t)(addr7 << 1), start, data, length, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_READ_MEM,
        name: "kb_i2c_read_mem_bytes",
        code: r#"static bool kb_i2c_read_mem_bytes(
    int bus,
    uint8_t addr7,
    uint8_t start,
    uint8_t* data,
    size_t length,
    uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_read_mem(handle, (uint8_t)(addr7 << 1), start, data, length, timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::I2C_DEVICE_READY,
        name: "kb_i2c_device_ready",
        code: r#"static bool kb_i2c_device_ready(int bus, uint8_t addr7, uint32_t timeout) {
    const FuriHalI2cBusHandle* handle = _resolve_i2c_handle(bus);
    furi_hal_i2c_acquire(handle);
    bool ok = furi_hal_i2c_is_device_ready(handle, (uint8_t)(addr7 << 1), timeout);
    furi_hal_i2c_release(handle);
    return ok;
}
"#,
    },
    Gated {
        gate: Features::DHT11,
        name: "dht11_read_raw",
        code: r#"// Single-wire DHT11 reader; bits are told apart by comparing high and low pulse lengths
static inline void dht11_line_setup(const GpioPin* pin) {
    furi_hal_gpio_write(pin, true);
    furi_hal_gpio_init(pin, GpioModeOutputOpenDrain, GpioPullUp, GpioSpeedVeryHigh);
}

static int dht11_read_raw(const GpioPin* pin, uint8_t data[5]) {
    power_ensure_5v();
    dht11_line_setup(pin);

    furi_hal_gpio_write(pin, false);
    furi_delay_ms(19);

    __disable_irq();
    furi_hal_gpio_write(pin, true);

    uint16_t timeout = 0;
    while(!furi_hal_gpio_read(pin)) {
        if(++timeout > 500) { __enable_irq(); return -1; }
    }
    timeout = 0;
    while(furi_hal_gpio_read(pin)) {
        if(++timeout > 500) { __enable_irq(); return -2; }
    }
    while(!furi_hal_gpio_read(pin)) {
        if(++timeout > 500) { __enable_irq(); return -3; }
    }
    timeout = 0;
    while(furi_hal_gpio_read(pin)) {
        if(++timeout > 500) { __enable_irq(); return -4; }
    }

    for(uint8_t byte = 0; byte < 5; byte++) {
        data[byte] = 0;
        for(int8_t bit = 7; bit >= 0; bit--) {
            uint16_t high = 0, low = 0;
            while(!furi_hal_gpio_read(pin) && low != 65535) low++;
            while(furi_hal_gpio_read(pin) && high != 65535) high++;
            if(high > low) data[byte] |= (1u << bit);
        }
    }

    __enable_irq();

    if(((uint8_t)(data[0] + data[1] + data[2] + data[3])) != data[4]) return -5;
    return 0;
}

// Degrees Celsius, or -99 if the sensor did not answer
static inline int dht11_read_temperature_c(const GpioPin* pin) {
    uint8_t data[5] = {0};
    if(dht11_read_raw(pin, data) != 0) return -99;

    int temp = (int)data[2];
    if((data[3] & 0x80) && (data[3] & 0x7F)) {
        temp = -(temp + 1);
    } else if(data[3] & 0x80) {
        temp = -temp;
    }
    return temp;
}

// Relative humidity in percent, or -1 if the sensor did not answer
static inline int dht11_read_humidity_percent(const GpioPin* pin) {
    uint8_t data[5] = {0};
    if(dht11_read_raw(pin, data) != 0) return -1;
    return (int)data[0];
}
"#,
    },
    Gated {
        gate: Features::SERVO_TIM1,
        name: "servo_custom_pwm_set_params",
        code: r#"// Servo angle to TIM1 compare at 50Hz (about 3% to 13% duty)
static inline uint32_t servo_angle_to_compare(uint8_t angle) {
    const uint32_t min_compare = 1920;
    const uint32_t max_compare = 8320;
    if(angle >= 180) return max_compare;
    return min_compare + ((uint32_t)angle * (max_compare - min_compare)) / 180u;
}

static void servo_custom_pwm_set_params(uint32_t freq, uint32_t compare) {
    if(freq == 0) return;

    uint32_t freq_div = 64000000UL / freq;
    uint32_t prescaler = freq_div / 0x10000UL;
    uint32_t period = freq_div / (prescaler + 1UL);
    if(period == 0) period = 1;

    LL_TIM_SetPrescaler(TIM1, prescaler);
    LL_TIM_SetAutoReload(TIM1, period - 1);
    LL_TIM_OC_SetCompareCH1(TIM1, compare);
}
"#,
    },
    Gated {
        gate: Features::SERVO_LPTIM,
        name: "servo_lptim2_set_params",
        code: r#"// Servo angle to an LPTIM2 compare for 500us to 2400us pulses in a 20ms period
static inline uint32_t servo_angle_to_lptim_compare(uint8_t angle, uint32_t period_ticks) {
    const uint32_t min_us = 500;
    const uint32_t max_us = 2400;
    if(angle > 180) angle = 180;

    uint32_t pulse_us = min_us + ((uint32_t)angle * (max_us - min_us)) / 180u;
    return (pulse_us * period_ticks) / 20000u;
}

static void servo_lptim2_set_params(uint32_t freq_hz, uint32_t compare) {
    if(freq_hz == 0) return;

    uint32_t period_ticks = LL_LPTIM_GetAutoReload(LPTIM2);
    if(period_ticks == 0) return;
    if(compare >= period_ticks) compare = period_ticks - 1;

    LL_LPTIM_SetAutoReload(LPTIM2, period_ticks);
    LL_LPTIM_SetCompare(LPTIM2, compare);
}
"#,
    },
];

pub fn write_includes<W: Write>(features: Features, out: &mut W) -> fmt::Result {
    for include in INCLUDES.iter().filter(|include| include.is_enabled(features)) {
        emit!(out, "#include <{}>", include.code)?;
    }

    Ok(())
}

pub fn write_helpers<W: Write>(features: Features, out: &mut W) -> fmt::Result {
    if features.contains(Features::STORAGE) {
        emit!(out, "// Storage helpers")?;
    }

    for helper in HELPERS.iter().filter(|helper| helper.is_enabled(features)) {
        out.write_str(helper.code)?;
        emit!(out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn helpers(features: Features) -> String {
        let mut out = String::new();
        write_helpers(features, &mut out).unwrap();
        out
    }

    #[test]
    fn nothing_is_emitted_without_flags() {
        assert_eq!(helpers(Features::empty()), "");
    }

    #[test]
    fn every_helper_is_defined_once() {
        let code = helpers(Features::all());
        for helper in HELPERS {
            let definition = format!(" {}(", helper.name);
            let count = code
                .lines()
                .filter(|line| line.starts_with("static") && line.contains(&definition))
                .count();

            assert_eq!(count, 1, "{}", helper.name);
        }
    }

    #[test]
    fn register_helpers_follow_their_sub_flags() {
        let code = helpers(Features::I2C | Features::I2C_READ_REG8);
        assert!(code.contains("_resolve_i2c_handle(int bus)"));
        assert!(code.contains("kb_i2c_read_reg8("));
        assert!(!code.contains("kb_i2c_write_reg8("));
        assert!(!code.contains("kb_i2c_device_ready("));
    }

    #[test]
    fn servo_variants_bring_their_own_headers() {
        let mut out = String::new();
        write_includes(Features::SERVO_LPTIM, &mut out).unwrap();

        assert!(out.contains("#include <stm32wbxx_ll_lptim.h>\n"));
        assert!(out.contains("#include <stm32wbxx_ll_rcc.h>\n"));
        assert!(!out.contains("stm32wbxx_ll_tim.h"));
    }

    #[test]
    fn sensors_share_the_power_helper() {
        let code = helpers(Features::ULTRASONIC | Features::DHT11);
        assert_eq!(code.matches("static void power_ensure_5v(void)").count(), 1);
    }

    // Réplica en Rust del ciclo de rechazo de `random_range`
    fn random_range(mut min: i32, mut max: i32, mut draw: impl FnMut() -> u32) -> i32 {
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }

        if min == max {
            return min;
        }

        let range = (max - min + 1) as u32;
        let limit = u32::MAX - (u32::MAX % range);

        loop {
            let value = draw();
            if value < limit {
                return min + (value % range) as i32;
            }
        }
    }

    fn xorshift(mut state: u32) -> impl FnMut() -> u32 {
        move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        }
    }

    #[test]
    fn random_helper_rejects_the_biased_tail() {
        let code = helpers(Features::RANDOM);
        assert!(code.contains("uint32_t limit = UINT32_MAX - (UINT32_MAX % range);"));
        assert!(code.contains("} while(draw >= limit);"));
        assert!(code.contains("return min + (int)(draw % range);"));

        // 2^32 - 1 deja resto 3 módulo 7
        let mut draws = vec![u32::MAX - 2, 10].into_iter();
        assert_eq!(random_range(0, 6, || draws.next().unwrap_or(0)), 3);
        assert_eq!(draws.next(), None);

        assert_eq!(random_range(5, 5, || unreachable!()), 5);
        assert_eq!(random_range(9, 7, || 1), 8);
    }

    #[test]
    fn random_helper_is_uniform() {
        let mut generator = xorshift(0x2545_f491);
        let mut counts = [0u32; 3];
        for _ in 0..30_000 {
            let value = random_range(0, 2, &mut generator);
            counts[value as usize] += 1;
        }

        for count in counts {
            assert!((9_500..=10_500).contains(&count), "{:?}", counts);
        }
    }
}
