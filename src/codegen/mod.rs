//! Ensamblado del programa final.
//!
//! El ensamblador recorre una única vez el contexto ya completo y escribe
//! las secciones en orden fijo: cabeceras, tipos, rutinas auxiliares,
//! almacenamiento, la estructura de la aplicación, las funciones del
//! ciclo de vida y, al final, los manifiestos. No toma decisiones propias:
//! todo lo que emite está determinado por las banderas y listas del
//! contexto.

use std::fmt::{self, Write};

use tracing::debug;

use crate::{
    artifact::{MANIFEST_END, MANIFEST_START},
    context::{Context, Features},
    ir::{indent, Scope},
};

pub mod helpers;
pub mod manifest;

/// Mensaje que se dibuja cuando el programa no dibuja nada.
pub const PLACEHOLDER: &str = "widget_add_string_multiline_element(app->widget, 64, 32, \
                               AlignCenter, AlignCenter, FontPrimary, \"Add blocks to Draw section\");";

/// Periodo mínimo entre lecturas de un DHT11.
const DHT11_MIN_INTERVAL_MS: u32 = 2000;

/// Espera tras energizar un DHT11 antes de la primera lectura.
const DHT11_WARMUP_MS: u32 = 1200;

pub fn write<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    let features = context.features();
    debug!(?features, storage = context.storage().len(), "assembling program");

    helpers::write_includes(features, out)?;
    emit!(out)?;
    write_types(out)?;
    helpers::write_helpers(features, out)?;
    write_globals(context, out)?;
    write_app(context, out)?;
    write_forward_declarations(context, out)?;
    write_render(context, out)?;
    write_dispatch(context, out)?;
    write_callbacks(context, out)?;
    write_alloc(context, out)?;
    write_free(context, out)?;
    write_main(context, out)?;
    write_manifests(context, out)
}

fn write_types<W: Write>(out: &mut W) -> fmt::Result {
    out.write_str(
        "typedef enum {\n    MyViewWidget,\n} ViewId;\n\n\
         typedef enum {\n    CustomEventTypeRedraw,\n} CustomEventType;\n\n",
    )
}

fn write_globals<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    let mut globals = context
        .storage()
        .iter()
        .filter(|decl| decl.scope() == Scope::Global)
        .peekable();

    if globals.peek().is_none() {
        return Ok(());
    }

    emit!(out, "// Global storage generated from blocks")?;
    for decl in globals {
        emit!(out, "{}", decl.declaration())?;
    }

    emit!(out)
}

fn write_app<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    emit!(out, "typedef struct {{")?;
    emit!(out, 1; "ViewDispatcher* view_dispatcher;")?;
    emit!(out, 1; "Widget* widget;")?;

    if context.features().contains(Features::NOTIFICATIONS) {
        emit!(out, 1; "NotificationApp* notif;")?;
    }

    for index in 0..context.timers().len() {
        emit!(out, 1; "FuriTimer* timer_{};", index)?;
    }

    let scalars = context
        .storage()
        .iter()
        .filter(|decl| decl.scope() == Scope::Instance);

    for decl in scalars {
        emit!(out, 1; "{}", decl.declaration())?;
    }

    emit!(out, "}} App;")?;
    emit!(out)
}

fn write_forward_declarations<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    if context.timers().is_empty() && context.buttons().is_empty() {
        return Ok(());
    }

    for index in 0..context.timers().len() {
        emit!(out, "static void app_timer_callback_{}(void* context);", index)?;
    }

    for index in 0..context.buttons().len() {
        emit!(
            out,
            "static void app_button_cb_{}(GuiButtonType result, InputType type, void* context);",
            index
        )?;
    }

    emit!(out)
}

fn write_render<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    emit!(out, "static void update_render(App* app) {{")?;
    emit!(out, 1; "furi_assert(app);")?;
    emit!(out, 1; "widget_reset(app->widget);")?;

    for statement in context.pre_render() {
        emit!(out, 1; "{}", statement)?;
    }

    let render = &context.sections().render;
    if render.trim().is_empty() {
        emit!(out, 1; "{}", PLACEHOLDER)?;
    } else {
        out.write_str(&indent(render))?;
    }

    emit!(out, "}}")?;
    emit!(out)
}

/// Despacho de eventos propios, de entrada y de navegación.
fn write_dispatch<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    out.write_str(
        "static bool app_custom_event_callback(void* context, uint32_t event) {\n    \
             App* app = context;\n    \
             furi_assert(app);\n    \
             switch(event) {\n    \
             case CustomEventTypeRedraw:\n        \
                 update_render(app);\n        \
                 return true;\n    \
             default:\n        \
                 return false;\n    \
             }\n\
         }\n\n",
    )?;

    emit!(out, "static bool app_input_callback(InputEvent* event, void* context) {{")?;
    emit!(out, 1; "App* app = context;")?;
    emit!(out, 1; "furi_assert(app);")?;
    emit!(out, 1; "UNUSED(app);")?;
    emit!(out, 1; "(void)event;")?;
    emit!(out, 1; "bool consumed = false;")?;
    out.write_str(&indent(&context.sections().input))?;
    emit!(out, 1; "return consumed;")?;
    emit!(out, "}}")?;
    emit!(out)?;

    out.write_str(
        "static bool app_navigation_callback(void* context) {\n    \
             App* app = context;\n    \
             furi_assert(app);\n    \
             view_dispatcher_stop(app->view_dispatcher);\n    \
             return true;\n\
         }\n\n\
         static uint32_t app_view_navigation_callback(void* context) {\n    \
             App* app = context;\n    \
             furi_assert(app);\n    \
             view_dispatcher_stop(app->view_dispatcher);\n    \
             return VIEW_NONE;\n\
         }\n\n",
    )
}

fn write_callbacks<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    for (index, timer) in context.timers().iter().enumerate() {
        emit!(out, "static void app_timer_callback_{}(void* context) {{", index)?;
        emit!(out, 1; "App* app = context;")?;
        emit!(out, 1; "furi_assert(app);")?;
        emit!(out, 1; "UNUSED(app);")?;
        out.write_str(&indent(&timer.body))?;
        emit!(out, "}}")?;
        emit!(out)?;
    }

    for (index, body) in context.buttons().iter().enumerate() {
        emit!(
            out,
            "static void app_button_cb_{}(GuiButtonType result, InputType type, void* context) {{",
            index
        )?;

        emit!(out, 1; "App* app = context;")?;
        emit!(out, 1; "furi_assert(app);")?;
        emit!(out, 1; "UNUSED(app);")?;
        emit!(out, 1; "UNUSED(result);")?;
        emit!(out, 1; "if(type == InputTypeShort) {{")?;
        out.write_str(&indent(&indent(body)))?;
        emit!(out, 1; "}}")?;
        emit!(out, "}}")?;
        emit!(out)?;
    }

    Ok(())
}

fn write_alloc<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    let features = context.features();
    let notifications = features.contains(Features::NOTIFICATIONS);

    emit!(out, "static App* app_alloc(void) {{")?;
    emit!(out, 1; "App* app = malloc(sizeof(App));")?;
    emit!(out, 1; "furi_assert(app);")?;
    emit!(out)?;
    emit!(out, 1; "Gui* gui = furi_record_open(RECORD_GUI);")?;
    if notifications {
        emit!(out, 1; "app->notif = furi_record_open(RECORD_NOTIFICATION);")?;
    }

    out.write_str(
        "\n    \
         app->view_dispatcher = view_dispatcher_alloc();\n    \
         view_dispatcher_attach_to_gui(app->view_dispatcher, gui, ViewDispatcherTypeFullscreen);\n    \
         view_dispatcher_set_custom_event_callback(app->view_dispatcher, app_custom_event_callback);\n    \
         view_dispatcher_set_navigation_event_callback(app->view_dispatcher, app_navigation_callback);\n    \
         view_dispatcher_set_event_callback_context(app->view_dispatcher, app);\n\n    \
         app->widget = widget_alloc();\n    \
         view_set_previous_callback(widget_get_view(app->widget), app_view_navigation_callback);\n    \
         view_set_input_callback(widget_get_view(app->widget), app_input_callback);\n    \
         view_set_context(widget_get_view(app->widget), app);\n    \
         view_dispatcher_add_view(app->view_dispatcher, MyViewWidget, widget_get_view(app->widget));\n    \
         view_dispatcher_switch_to_view(app->view_dispatcher, MyViewWidget);\n",
    )?;

    let zeroed: Vec<_> = context.storage().iter().filter_map(|decl| decl.zero_init()).collect();
    if !zeroed.is_empty() {
        emit!(out)?;
        for statement in zeroed {
            emit!(out, 1; "{}", statement)?;
        }
    }

    if features.intersects(Features::POWERED) {
        emit!(out)?;
        emit!(out, 1; "power_ensure_5v();")?;
    }

    if !context.init().is_empty() {
        emit!(out)?;
        for statement in context.init() {
            emit!(out, 1; "{}", statement)?;
        }
    }

    let setup = &context.sections().setup;
    if !setup.trim().is_empty() {
        emit!(out)?;
        out.write_str(&indent(setup))?;
    }

    if !context.timers().is_empty() {
        let dht11 = features.contains(Features::DHT11);
        emit!(out)?;

        for index in 0..context.timers().len() {
            emit!(
                out, 1;
                "app->timer_{0} = furi_timer_alloc(app_timer_callback_{0}, FuriTimerTypePeriodic, app);",
                index
            )?;
        }

        if dht11 {
            emit!(out, 1; "furi_delay_ms({});", DHT11_WARMUP_MS)?;
        }

        for (index, timer) in context.timers().iter().enumerate() {
            let interval = if dht11 {
                timer.interval_ms.max(DHT11_MIN_INTERVAL_MS)
            } else {
                timer.interval_ms
            };

            emit!(out, 1; "furi_timer_start(app->timer_{}, furi_ms_to_ticks({}));", index, interval)?;
        }
    }

    emit!(out)?;
    emit!(out, 1; "return app;")?;
    emit!(out, "}}")?;
    emit!(out)
}

fn write_free<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    let features = context.features();

    emit!(out, "static void app_free(App* app) {{")?;
    emit!(out, 1; "furi_assert(app);")?;
    emit!(out)?;

    if !context.timers().is_empty() {
        for index in 0..context.timers().len() {
            emit!(out, 1; "furi_timer_stop(app->timer_{});", index)?;
            emit!(out, 1; "furi_timer_free(app->timer_{});", index)?;
        }

        emit!(out)?;
    }

    if !context.pwm_outputs().is_empty() {
        for output in context.pwm_outputs() {
            emit!(
                out, 1;
                "if(furi_hal_pwm_is_running({0})) furi_hal_pwm_stop({0});",
                output.channel()
            )?;
        }

        emit!(out)?;
    }

    emit!(out, 1; "view_dispatcher_remove_view(app->view_dispatcher, MyViewWidget);")?;
    emit!(out, 1; "widget_free(app->widget);")?;
    emit!(out, 1; "view_dispatcher_free(app->view_dispatcher);")?;
    emit!(out)?;
    emit!(out, 1; "furi_record_close(RECORD_GUI);")?;

    if features.contains(Features::NOTIFICATIONS) {
        emit!(out, 1; "furi_record_close(RECORD_NOTIFICATION);")?;
    }

    if features.intersects(Features::POWERED) {
        emit!(out, 1; "if(furi_hal_power_is_otg_enabled()) furi_hal_power_disable_otg();")?;
    }

    emit!(out)?;
    emit!(out, 1; "free(app);")?;
    emit!(out, "}}")?;
    emit!(out)
}

fn write_main<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    emit!(out, "int32_t {}(void* p) {{", manifest::ENTRY_POINT)?;
    emit!(out, 1; "UNUSED(p);")?;
    emit!(out, 1; "App* app = app_alloc();")?;
    emit!(out)?;
    emit!(out, 1; "view_dispatcher_send_custom_event(app->view_dispatcher, CustomEventTypeRedraw);")?;
    emit!(out, 1; "view_dispatcher_run(app->view_dispatcher);")?;

    let repeat = &context.sections().repeat;
    if !repeat.trim().is_empty() {
        emit!(out)?;
        out.write_str(&indent(repeat))?;
    }

    emit!(out)?;
    emit!(out, 1; "app_free(app);")?;
    emit!(out, 1; "return 0;")?;
    emit!(out, "}}")
}

/// Bloque final con un manifiesto por cada bloque de manifiesto, en el
/// orden en que aparecieron.
fn write_manifests<W: Write>(context: &Context, out: &mut W) -> fmt::Result {
    if context.manifests().is_empty() {
        return Ok(());
    }

    emit!(out)?;
    emit!(out, "/*")?;

    for spec in context.manifests() {
        emit!(out, "{}", MANIFEST_START)?;
        manifest::render(spec, out)?;
        emit!(out)?;
        emit!(out, "{}", MANIFEST_END)?;
    }

    emit!(out, "*/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        board::{self, PinMode, PwmOutput},
        codegen::manifest::ManifestSpec,
        context::Phase,
        graph::Node,
        ir::{CType, StorageDecl},
    };
    use pretty_assertions::assert_eq;

    fn assembled(context: &Context) -> String {
        let mut out = String::new();
        write(context, &mut out).unwrap();
        out
    }

    #[test]
    fn empty_program_draws_the_placeholder() {
        let code = assembled(&Context::new());

        assert!(code.starts_with("#include <furi.h>\n#include <furi_hal.h>\n"));
        assert!(code.contains(PLACEHOLDER));
        assert!(code.contains("int32_t app_main(void* p) {"));
        assert!(!code.contains("/*\n"));
        assert!(!code.contains("storage/storage.h"));
    }

    #[test]
    fn storage_is_split_by_scope() {
        let mut context = Context::new();
        context.declare(StorageDecl::new("score", CType::Int));
        context.declare(StorageDecl::new("name", CType::Text(256)));

        let code = assembled(&context);
        assert!(code.contains("// Global storage generated from blocks\nchar name[256];\n"));
        assert!(code.contains("    Widget* widget;\n    int score;\n} App;"));
        assert!(code.contains("    app->score = 0;\n"));
        assert_eq!(code.matches("char name[256];").count(), 1);
    }

    #[test]
    fn timers_have_their_own_handles() {
        let mut context = Context::new();
        context.push_timer(100, String::from("app->ticks += 1;\n"));
        context.push_timer(250, String::new());

        let code = assembled(&context);
        assert!(code.contains("    FuriTimer* timer_0;\n    FuriTimer* timer_1;\n"));
        assert!(code.contains("static void app_timer_callback_1(void* context);\n"));
        assert!(code.contains("    UNUSED(app);\n    app->ticks += 1;\n}\n"));
        assert!(code.contains("furi_timer_start(app->timer_0, furi_ms_to_ticks(100));"));
        assert!(code.contains("furi_timer_stop(app->timer_1);"));
    }

    #[test]
    fn dht11_slows_timers_down() {
        let mut context = Context::new();
        context.enable(Features::DHT11);
        context.push_timer(500, String::new());

        let code = assembled(&context);
        assert!(code.contains("    furi_delay_ms(1200);\n    furi_timer_start(app->timer_0, furi_ms_to_ticks(2000));"));
        assert!(code.contains("    power_ensure_5v();\n"));
        assert!(code.contains("furi_hal_power_disable_otg();"));
    }

    #[test]
    fn sections_land_in_their_functions() {
        let mut context = Context::new();
        context.append(Phase::Setup, "setup_marker();\n");
        context.append(Phase::Render, "render_marker();\n");
        context.append(Phase::Input, "input_marker();\n");
        context.append(Phase::Loop, "loop_marker();\n");
        context.hoist(String::from("hoisted_marker();"));

        let code = assembled(&context);
        let position = |marker: &str| code.find(marker).unwrap();

        assert!(position("static void update_render") < position("hoisted_marker"));
        assert!(position("hoisted_marker") < position("render_marker"));
        assert!(position("app_input_callback(InputEvent") < position("input_marker"));
        assert!(position("static App* app_alloc") < position("setup_marker"));
        assert!(position("view_dispatcher_run") < position("loop_marker"));
        assert!(position("loop_marker") < position("app_free(app);"));
        assert!(!code.contains(PLACEHOLDER));
    }

    #[test]
    fn pins_are_set_up_before_user_code() {
        let mut context = Context::new();
        context.configure_pin(board::gpio(Some("PC3")), PinMode::Analog, "GpioPullNo");
        context.append(Phase::Setup, "setup_marker();\n");

        let code = assembled(&context);
        let init = code.find("furi_hal_gpio_init(&gpio_ext_pc3").unwrap();
        assert!(init < code.find("setup_marker").unwrap());
    }

    #[test]
    fn used_pwm_outputs_are_stopped() {
        let mut context = Context::new();
        context.enable(Features::PWM);
        context.use_pwm(PwmOutput::Tim1);

        let code = assembled(&context);
        assert!(code.contains(
            "    if(furi_hal_pwm_is_running(FuriHalPwmOutputIdTim1PA7)) furi_hal_pwm_stop(FuriHalPwmOutputIdTim1PA7);\n"
        ));
        assert!(!code.contains("furi_hal_pwm_start"));
    }

    #[test]
    fn manifests_are_delimited_one_by_one() {
        let mut context = Context::new();
        let first = Node::new("flipper_manifest").with_field("APPID", "first");
        let second = Node::new("flipper_manifest").with_field("APPID", "second");
        context.push_manifest(ManifestSpec::from_node(&first));
        context.push_manifest(ManifestSpec::from_node(&second));

        let code = assembled(&context);
        let footer = &code[code.rfind("\n/*\n").unwrap()..];

        assert_eq!(footer.matches(MANIFEST_START).count(), 2);
        assert_eq!(footer.matches(MANIFEST_END).count(), 2);
        assert!(footer.find("appid=\"first\"").unwrap() < footer.find("appid=\"second\"").unwrap());
        assert!(footer.ends_with(&format!("{}\n*/\n", MANIFEST_END)));
    }
}
