use blockc::{
    artifact::{extract_manifests, MANIFEST_END, MANIFEST_START},
    codegen::{
        helpers::{HELPERS, INCLUDES},
        PLACEHOLDER,
    },
    compile, compile_json, Artifact, Graph,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn build(blocks: Value) -> Artifact {
    build_with(blocks, json!([]))
}

fn build_with(blocks: Value, variables: Value) -> Artifact {
    let document = json!({
        "variables": variables,
        "blocks": { "blocks": blocks },
    });

    compile(&Graph::from_value(document).unwrap())
}

fn number(value: f64) -> Value {
    json!({ "block": { "type": "math_number", "fields": { "NUM": value } } })
}

fn text(value: &str) -> Value {
    json!({ "block": { "type": "text", "fields": { "TEXT": value } } })
}

fn sleep(ms: f64, next: Option<Value>) -> Value {
    let mut block = json!({ "type": "flipper_sleep_ms", "inputs": { "MS": number(ms) } });
    if let Some(next) = next {
        block["next"] = json!({ "block": next });
    }

    block
}

fn app(setup: Value, draw: Value, input: Value, repeat: Value) -> Value {
    let mut inputs = serde_json::Map::new();
    for (name, chain) in [("SETUP", setup), ("DRAW", draw), ("INPUT", input), ("LOOP", repeat)] {
        if !chain.is_null() {
            inputs.insert(name.to_owned(), json!({ "block": chain }));
        }
    }

    json!({ "type": "flipper_app", "id": "app", "inputs": inputs })
}

fn draw_text(value: Value) -> Value {
    json!({
        "type": "flipper_canvas_draw_text",
        "inputs": { "X": number(2.0), "Y": number(10.0), "TEXT": value }
    })
}

/// Porción del texto entre el primer `start` y el siguiente `end`.
fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).unwrap();
    let to = from + text[from..].find(end).unwrap();
    &text[from..to]
}

#[test]
fn compilation_is_deterministic() {
    let blocks = json!([
        app(
            json!({
                "type": "variables_set",
                "fields": { "VAR": { "id": "v1" } },
                "inputs": { "VALUE": number(3.0) }
            }),
            draw_text(json!({ "block": {
                "type": "flipper_number_to_string",
                "inputs": { "NUMBER": { "block": { "type": "variables_get", "fields": { "VAR": { "id": "v1" } } } } }
            }})),
            Value::Null,
            Value::Null,
        ),
        { "type": "flipper_timer_periodic", "fields": { "INTERVAL": 250 } },
        { "type": "flipper_manifest", "fields": { "APPID": "det" } },
    ]);

    let variables = json!([{ "id": "v1", "name": "score" }]);
    let first = build_with(blocks.clone(), variables.clone());
    let second = build_with(blocks, variables);

    assert_eq!(first.text(), second.text());
    assert!(first.text().contains("snprintf(num_str_0, sizeof(num_str_0), \"%ld\", (long)(app->score));"));
}

#[test]
fn helpers_and_includes_follow_feature_usage() {
    let analog = json!({ "block": {
        "type": "flipper_gpio_analog_read",
        "fields": { "PIN": "PA6", "MODE": "RAW" }
    }});

    let random = json!({ "block": {
        "type": "flipper_random_number",
        "inputs": { "MIN": number(1.0), "MAX": number(6.0) }
    }});

    let mut draw = draw_text(analog);
    draw["next"] = json!({ "block": draw_text(random) });

    let artifact = build(json!([app(Value::Null, draw, Value::Null, Value::Null)]));
    let text = artifact.text();

    let used = ["adc_read_raw_on_gpio", "random_range"];
    for helper in HELPERS {
        let count = text.matches(helper.code).count();
        let expected = usize::from(used.contains(&helper.name));
        assert_eq!(count, expected, "helper {}", helper.name);
    }

    let headers = ["furi_hal_adc.h", "furi_hal_resources.h"];
    for include in INCLUDES.iter().filter(|include| !include.gate.is_empty()) {
        let count = text.matches(&format!("#include <{}>\n", include.code)).count();
        let expected = usize::from(headers.contains(&include.name));
        assert_eq!(count, expected, "include {}", include.name);
    }

    assert!(!text.contains("storage/storage.h"));
    assert!(!text.contains("math.h"));
}

#[test]
fn repeated_variables_are_declared_once() {
    let get = || json!({ "block": { "type": "variables_get", "fields": { "VAR": { "id": "v" } } } });
    let setup = json!({
        "type": "variables_set",
        "fields": { "VAR": { "id": "v" } },
        "inputs": { "VALUE": number(1.0) },
        "next": { "block": {
            "type": "math_change",
            "fields": { "VAR": { "id": "v" } },
            "inputs": { "DELTA": get() },
            "next": { "block": {
                "type": "variables_set",
                "fields": { "VAR": { "id": "v" } },
                "inputs": { "VALUE": get() }
            }}
        }}
    });

    let artifact = build_with(
        json!([app(setup, Value::Null, Value::Null, Value::Null)]),
        json!([{ "id": "v", "name": "lives" }]),
    );

    let text = artifact.text();
    assert_eq!(text.matches("int lives;").count(), 1);
    assert!(text.contains("app->lives = 1;\n"));
    assert!(text.contains("app->lives += app->lives;\n"));
    assert!(artifact.diagnostics().is_empty());
}

#[test]
fn shared_pins_are_initialized_once() {
    let read = || json!({ "block": { "type": "flipper_gpio_analog_read", "fields": { "PIN": "PA6" } } });
    let setup = json!({
        "type": "variables_set",
        "fields": { "VAR": "a" },
        "inputs": { "VALUE": read() },
        "next": { "block": {
            "type": "variables_set",
            "fields": { "VAR": "b" },
            "inputs": { "VALUE": read() }
        }}
    });

    let artifact = build(json!([app(setup, draw_text(read()), Value::Null, Value::Null)]));
    let text = artifact.text();

    assert_eq!(text.matches("furi_hal_gpio_init(&gpio_ext_pa6, GpioModeAnalog").count(), 1);
    assert!(between(text, "static App* app_alloc", "return app;").contains("furi_hal_gpio_init(&gpio_ext_pa6"));
}

#[test]
fn random_numbers_use_rejection_sampling() {
    let random = |min: f64, max: f64| json!({ "block": {
        "type": "flipper_random_number",
        "inputs": { "MIN": number(min), "MAX": number(max) }
    }});

    let setup = json!({
        "type": "variables_set",
        "fields": { "VAR": "same" },
        "inputs": { "VALUE": random(5.0, 5.0) },
        "next": { "block": {
            "type": "variables_set",
            "fields": { "VAR": "swapped" },
            "inputs": { "VALUE": random(10.0, 1.0) }
        }}
    });

    let artifact = build(json!([app(setup, Value::Null, Value::Null, Value::Null)]));
    let text = artifact.text();

    assert!(text.contains("app->same = random_range(5, 5);"));
    assert!(text.contains("app->swapped = random_range(10, 1);"));

    let helper = between(text, "static int random_range", "\n}\n");
    assert!(helper.contains("if(min == max) {\n        return min;"));
    assert!(helper.contains("if(min > max) {"));
    assert!(helper.contains("} while(draw >= limit);"));
    assert!(!helper.contains("rand()"));
}

#[test]
fn variable_names_are_sanitized() {
    let set = |name: &str, next: Option<Value>| {
        let mut block = json!({
            "type": "variables_set",
            "fields": { "VAR": name },
            "inputs": { "VALUE": number(0.0) }
        });

        if let Some(next) = next {
            block["next"] = json!({ "block": next });
        }

        block
    };

    let setup = set("3x!", Some(set("while", Some(set("   ", None)))));
    let artifact = build(json!([app(setup, Value::Null, Value::Null, Value::Null)]));
    let text = artifact.text();

    assert!(text.contains("    int var_3x;\n"));
    assert!(text.contains("    int var_while;\n"));
    assert!(text.contains("    int variable;\n"));
    assert!(!text.contains("int while;"));
}

#[test]
fn unknown_blocks_leave_a_placeholder() {
    let setup = sleep(
        10.0,
        Some(json!({
            "type": "flipper_teleport",
            "id": "mystery",
            "next": { "block": sleep(20.0, None) }
        })),
    );

    let artifact = build(json!([app(setup, Value::Null, Value::Null, Value::Null)]));
    let setup = between(artifact.text(), "static App* app_alloc", "return app;");

    let first = setup.find("furi_delay_ms(10);").unwrap();
    let placeholder = setup.find("/* unsupported block: flipper_teleport */").unwrap();
    let last = setup.find("furi_delay_ms(20);").unwrap();
    assert!(first < placeholder && placeholder < last);

    let diagnostics = artifact.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(
        diagnostics.locations().next().unwrap().to_string(),
        "blocks[0] > SETUP > next (block mystery)"
    );

    assert!(artifact.text().trim_end().ends_with('}'));
}

#[test]
fn manifests_keep_their_order() {
    let artifact = build(json!([
        { "type": "flipper_manifest", "fields": { "APPID": "first_app", "NAME": "First" } },
        app(Value::Null, Value::Null, Value::Null, Value::Null),
        { "type": "flipper_manifest", "fields": { "APPID": "second_app", "STACK": 2048 } },
    ]));

    let text = artifact.text();
    assert_eq!(text.matches(MANIFEST_START).count(), 2);
    assert_eq!(text.matches(MANIFEST_END).count(), 2);

    let manifests = artifact.manifests();
    assert_eq!(manifests, extract_manifests(text));
    assert_eq!(manifests.len(), 2);
    assert!(manifests[0].starts_with("App(\n    appid=\"first_app\",\n    name=\"First\",\n"));
    assert!(manifests[1].contains("appid=\"second_app\""));
    assert!(manifests[1].contains("stack_size=2048,"));

    let appid = manifests[0].find("appid=").unwrap();
    let entry = manifests[0].find("entry_point=\"app_main\"").unwrap();
    assert!(appid < entry);

    assert!(!artifact.source().contains(MANIFEST_START));
    assert!(artifact.source().ends_with("return 0;\n}\n"));
}

#[test]
fn phases_are_routed_to_their_sections() {
    let key = json!({
        "type": "flipper_input_if_key_type",
        "fields": { "TYPE": "InputTypeShort", "KEY": "InputKeyUp" },
        "inputs": { "DO": { "block": { "type": "flipper_request_redraw" } } }
    });

    let artifact = build(json!([app(
        sleep(11.0, Some(sleep(12.0, None))),
        draw_text(text("Hi")),
        key,
        sleep(31.0, None),
    )]));

    let text = artifact.text();
    let setup = between(text, "static App* app_alloc", "return app;");
    let render = between(text, "static void update_render", "\n}\n");
    let input = between(text, "static bool app_input_callback", "\n}\n");
    let main = between(text, "int32_t app_main", "\n}\n");

    assert!(setup.find("furi_delay_ms(11);").unwrap() < setup.find("furi_delay_ms(12);").unwrap());
    assert!(render.contains(
        "widget_add_string_element(app->widget, 2, 10, AlignLeft, AlignTop, FontPrimary, \"Hi\");"
    ));
    assert!(input.contains("if(event->type == InputTypeShort && event->key == InputKeyUp) {"));
    assert!(input.contains("consumed = true;"));
    assert!(main.find("view_dispatcher_run").unwrap() < main.find("furi_delay_ms(31);").unwrap());

    assert_eq!(text.matches("furi_delay_ms(11);").count(), 1);
    assert_eq!(text.matches("furi_delay_ms(31);").count(), 1);
    assert!(!text.contains(PLACEHOLDER));
}

#[test]
fn key_checks_outside_input_are_degraded() {
    let key = json!({ "type": "flipper_input_if_key_type" });
    let artifact = build(json!([app(key, Value::Null, Value::Null, Value::Null)]));

    let setup = between(artifact.text(), "static App* app_alloc", "return app;");
    assert!(!setup.contains("event->"));
    assert!(!setup.contains("consumed"));
    assert_eq!(artifact.diagnostics().len(), 1);
}

#[test]
fn empty_workspace_is_a_complete_program() {
    let artifact = compile(&Graph::from_json("{}").unwrap());
    let text = artifact.text();

    assert!(text.contains(PLACEHOLDER));
    assert!(text.contains("static App* app_alloc(void) {"));
    assert!(text.contains("static void app_free(App* app) {"));
    assert!(text.ends_with("return 0;\n}\n"));
    assert!(artifact.manifests().is_empty());
    assert!(artifact.diagnostics().is_empty());
}

#[test]
fn loose_statements_are_reported() {
    let artifact = build(json!([sleep(5.0, None)]));

    assert!(!artifact.text().contains("furi_delay_ms(5);"));
    assert_eq!(artifact.diagnostics().len(), 1);
    assert!(artifact
        .diagnostics()
        .messages()
        .next()
        .unwrap()
        .contains("flipper_sleep_ms"));
}

#[test]
fn degraded_blocks_bring_no_helpers() {
    let random = json!({ "block": { "type": "flipper_random_number" } });
    let pwm = json!({
        "type": "flipper_pwm_start",
        "fields": { "PIN": "PC3" },
        "inputs": { "DUTY": random }
    });
    let loose = json!({ "type": "flipper_sleep_ms", "inputs": { "MS": random } });

    let artifact = build(json!([app(pwm, Value::Null, Value::Null, Value::Null), loose]));
    let text = artifact.text();

    assert!(!text.contains("random_range"));
    assert!(!text.contains("furi_hal_random"));
    assert_eq!(artifact.diagnostics().len(), 2);
}

fn in_setup(chain: &str) -> String {
    format!(
        r#"{{ "blocks": {{ "blocks": [{{ "type": "flipper_app", "inputs": {{ "SETUP": {{ "block": {} }} }} }}] }} }}"#,
        chain
    )
}

#[test]
fn long_chains_compile_every_statement() {
    const REDRAW: &str = "view_dispatcher_send_custom_event(app->view_dispatcher, CustomEventTypeRedraw);";

    let chain = |length: usize| {
        let mut chain = String::new();
        for _ in 1..length {
            chain.push_str(r#"{ "type": "flipper_request_redraw", "next": { "block": "#);
        }

        chain.push_str(r#"{ "type": "flipper_request_redraw" }"#);
        chain.push_str(&" } }".repeat(length - 1));
        chain
    };

    let short = compile_json(&in_setup(&chain(1))).unwrap();
    let long = compile_json(&in_setup(&chain(300))).unwrap();

    assert!(long.diagnostics().is_empty());
    assert_eq!(long.text().matches(REDRAW).count(), short.text().matches(REDRAW).count() + 299);
}

#[test]
fn deeply_nested_expressions_compile() {
    let depth = 1000;
    let mut condition = String::new();
    for _ in 0..depth {
        condition.push_str(r#"{ "type": "logic_negate", "inputs": { "BOOL": { "block": "#);
    }

    condition.push_str(r#"{ "type": "logic_boolean", "fields": { "BOOL": "FALSE" } }"#);
    condition.push_str(&" } } }".repeat(depth));

    let statement = format!(
        r#"{{ "type": "controls_if", "inputs": {{ "IF0": {{ "block": {} }}, "DO0": {{ "block": {{ "type": "flipper_request_redraw" }} }} }} }}"#,
        condition
    );

    let artifact = compile_json(&in_setup(&statement)).unwrap();

    assert!(artifact.diagnostics().is_empty());
    assert!(artifact.text().contains(&format!("{}false", "!".repeat(depth))));
}
