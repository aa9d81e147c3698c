//! Modelo del grafo de bloques.
//!
//! El editor serializa el programa como un bosque de bloques en JSON.
//! Cada bloque tiene una clase, campos escalares, entradas de valor,
//! entradas de sentencia y opcionalmente un sucesor en la cadena. Este
//! módulo traduce esa representación a [`Graph`], resolviendo referencias
//! a variables y separando las entradas de sentencia de las de valor.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    io::Read,
};

use serde::{
    de::{self, value::MapAccessDeserializer, IgnoredAny, MapAccess, SeqAccess, Visitor},
    Deserialize, Deserializer,
};
use serde_json::Value;

use crate::{error::GraphError, stack::ensure_sufficient_stack};

node_kinds! {
    App => "flipper_app",
    Manifest => "flipper_manifest",
    ViewportSetup => "flipper_viewport_setup",
    CanvasClear => "flipper_canvas_clear",
    SetFont => "flipper_canvas_set_font",
    SetColor => "flipper_canvas_set_color",
    DrawText => "flipper_canvas_draw_text",
    DrawTextAligned => "flipper_canvas_draw_text_aligned",
    DrawBox => "flipper_canvas_draw_box",
    DrawFrame => "flipper_canvas_draw_frame",
    DrawRoundedBox => "flipper_canvas_draw_rbox",
    DrawRoundedFrame => "flipper_canvas_draw_rframe",
    DrawLine => "flipper_canvas_draw_line",
    DrawCircle => "flipper_canvas_draw_circle",
    DrawDisc => "flipper_canvas_draw_disc",
    DrawDot => "flipper_canvas_draw_dot",
    TextBox => "flipper_widget_text_box",
    TextScroll => "flipper_widget_text_scroll",
    Button => "flipper_widget_button",
    CanvasWidth => "flipper_canvas_width",
    CanvasHeight => "flipper_canvas_height",
    ExitOnBackShort => "flipper_input_exit_on_back_short",
    IfKeyType => "flipper_input_if_key_type",
    RequestRedraw => "flipper_request_redraw",
    NotifySequence => "flipper_notify_sequence",
    SleepMs => "flipper_sleep_ms",
    Log => "flipper_log",
    Print => "text_print",
    TimerPeriodic => "flipper_timer_periodic",
    Boolean => "logic_boolean",
    Compare => "logic_compare",
    Operation => "logic_operation",
    Negate => "logic_negate",
    Number => "math_number",
    Arithmetic => "math_arithmetic",
    BitAnd => "flipper_bitwise_and",
    BitOr => "flipper_bitwise_or",
    BitXor => "flipper_bitwise_xor",
    BitNot => "flipper_bitwise_not",
    HexNumber => "flipper_hex_number",
    Text => "text",
    If => "controls_if",
    Repeat => "controls_repeat_ext",
    WhileUntil => "controls_whileUntil",
    GetVariable => "variables_get",
    SetVariable => "variables_set",
    ChangeVariable => "math_change",
    StringToNumber => "flipper_string_to_number",
    NumberToString => "flipper_number_to_string",
    StringLength => "flipper_string_length",
    RandomNumber => "flipper_random_number",
    StorageRead => "flipper_storage_read",
    StorageWrite => "flipper_storage_write",
    StorageExists => "flipper_storage_exists",
    StorageCreate => "flipper_storage_create",
    StorageDelete => "flipper_storage_delete",
    GpioInit => "flipper_gpio_init",
    GpioWrite => "flipper_gpio_write",
    GpioRead => "flipper_gpio_read",
    AnalogRead => "flipper_gpio_analog_read",
    Potentiometer => "flipper_potentiometer_read",
    PwmStart => "flipper_pwm_start",
    PwmSet => "flipper_pwm_set",
    PwmStop => "flipper_pwm_stop",
    PwmRead => "flipper_pwm_read",
    Servo => "flipper_servo_180",
    ServoUnlock => "flipper_servo_unlock",
    Ultrasonic => "flipper_ultrasonic_distance_cm",
    PirMotion => "flipper_pir_motion",
    Dht11Temperature => "flipper_dht11_temp_c",
    Dht11Humidity => "flipper_dht11_humidity_percent",
    I2cDeviceReady => "flipper_i2c_device_ready",
    I2cReadReg8 => "flipper_i2c_read_reg8",
    I2cWriteReg8 => "flipper_i2c_write_reg8",
    I2cReadReg16 => "flipper_i2c_read_reg16",
    I2cWriteReg16 => "flipper_i2c_write_reg16",
    I2cReadBytes => "flipper_i2c_read_bytes",
    I2cWriteBytes => "flipper_i2c_write_bytes",
    I2cUpdateBits8 => "flipper_i2c_update_bits8",
    ByteStream => "flipper_byte_stream",
    ByteStreamLength => "flipper_byte_stream_length",
    ByteStreamGetByte => "flipper_byte_stream_get_byte",
}

impl NodeKind {
    /// Determina si el bloque produce un valor en lugar de una sentencia.
    pub fn produces_value(&self) -> bool {
        use NodeKind::*;

        matches!(
            self,
            CanvasWidth
                | CanvasHeight
                | Boolean
                | Compare
                | Operation
                | Negate
                | Number
                | Arithmetic
                | BitAnd
                | BitOr
                | BitXor
                | BitNot
                | HexNumber
                | Text
                | GetVariable
                | StringToNumber
                | NumberToString
                | StringLength
                | RandomNumber
                | StorageRead
                | StorageExists
                | GpioRead
                | AnalogRead
                | Potentiometer
                | PwmRead
                | Ultrasonic
                | PirMotion
                | Dht11Temperature
                | Dht11Humidity
                | I2cDeviceReady
                | I2cReadReg8
                | I2cReadReg16
                | I2cReadBytes
                | ByteStream
                | ByteStreamLength
                | ByteStreamGetByte
        )
    }

    /// Determina si una entrada con este nombre contiene sentencias.
    pub fn is_statement_slot(&self, input: &str) -> bool {
        use NodeKind::*;

        match self {
            App => matches!(input, "SETUP" | "DRAW" | "INPUT" | "LOOP"),
            If => input == "ELSE" || is_numbered(input, "DO"),
            Repeat | WhileUntil | IfKeyType | TimerPeriodic | Button => input == "DO",
            _ => false,
        }
    }

    /// Determina si una entrada de valor espera texto.
    ///
    /// Es la señal que se utiliza para inferir el tipo de una variable
    /// que se observa por primera vez como argumento.
    pub fn is_text_slot(&self, input: &str) -> bool {
        use NodeKind::*;

        if input == "STRING" {
            return true;
        }

        match self {
            DrawText | DrawTextAligned | TextBox | TextScroll | Print => input == "TEXT",
            Log => matches!(input, "TAG" | "MSG"),
            StorageRead | StorageExists | StorageCreate | StorageDelete => input == "PATH",
            StorageWrite => matches!(input, "PATH" | "DATA"),
            Button => input == "LABEL",
            _ => false,
        }
    }
}

fn is_numbered(input: &str, prefix: &str) -> bool {
    input
        .strip_prefix(prefix)
        .map(|suffix| !suffix.is_empty() && suffix.bytes().all(|byte| byte.is_ascii_digit()))
        .unwrap_or(false)
}

/// Valor escalar de un campo.
#[derive(Clone, Debug, PartialEq)]
pub enum Field {
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Field {
    /// Representación textual del campo.
    pub fn to_text(&self) -> String {
        match self {
            Field::Text(text) => text.clone(),
            Field::Number(number) => format_number(*number),
            Field::Bool(true) => String::from("TRUE"),
            Field::Bool(false) => String::from("FALSE"),
        }
    }

    /// Valor numérico del campo, si lo tiene.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Field::Number(number) => Some(*number),
            Field::Text(text) => text.trim().parse().ok().filter(|number: &f64| number.is_finite()),
            Field::Bool(_) => None,
        }
    }
}

impl From<&str> for Field {
    fn from(text: &str) -> Self {
        Field::Text(text.to_owned())
    }
}

impl From<String> for Field {
    fn from(text: String) -> Self {
        Field::Text(text)
    }
}

impl From<f64> for Field {
    fn from(number: f64) -> Self {
        Field::Number(number)
    }
}

impl From<i32> for Field {
    fn from(number: i32) -> Self {
        Field::Number(number.into())
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Bool(value)
    }
}

/// Formatea un número como literal C, sin decimales si es entero.
pub fn format_number(number: f64) -> String {
    if !number.is_finite() {
        String::from("0")
    } else if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{}", number)
    }
}

/// Un bloque del grafo.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    kind: NodeKind,
    id: Option<String>,
    fields: BTreeMap<String, Field>,
    values: BTreeMap<String, Node>,
    statements: BTreeMap<String, Node>,
    next: Option<Box<Node>>,
}

impl Node {
    pub fn new(kind: &str) -> Self {
        let kind = match kind.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        };

        Node {
            kind,
            id: None,
            fields: BTreeMap::new(),
            values: BTreeMap::new(),
            statements: BTreeMap::new(),
            next: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_owned());
        self
    }

    pub fn with_field<F: Into<Field>>(mut self, name: &str, field: F) -> Self {
        self.fields.insert(name.to_owned(), field.into());
        self
    }

    pub fn with_value(mut self, name: &str, node: Node) -> Self {
        self.values.insert(name.to_owned(), node);
        self
    }

    pub fn with_statement(mut self, name: &str, node: Node) -> Self {
        self.statements.insert(name.to_owned(), node);
        self
    }

    /// Agrega un sucesor al final de la cadena que inicia en este bloque.
    pub fn followed_by(mut self, node: Node) -> Self {
        let mut tail = &mut self.next;
        while let Some(next) = tail {
            tail = &mut next.next;
        }

        *tail = Some(Box::new(node));
        self
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Texto de un campo, si existe y no está vacío.
    pub fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(Field::to_text)
            .filter(|text| !text.trim().is_empty())
    }

    /// Texto de un campo tal cual, incluso si está en blanco.
    pub fn raw_field(&self, name: &str) -> String {
        self.fields.get(name).map(Field::to_text).unwrap_or_default()
    }

    pub fn field_or(&self, name: &str, default: &str) -> String {
        self.field(name).unwrap_or_else(|| default.to_owned())
    }

    pub fn number_field(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Field::to_number)
    }

    pub fn value(&self, name: &str) -> Option<&Node> {
        self.values.get(name)
    }

    pub fn statement(&self, name: &str) -> Option<&Node> {
        self.statements.get(name)
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.values.contains_key(name) || self.statements.contains_key(name)
    }

    pub fn next(&self) -> Option<&Node> {
        self.next.as_deref()
    }
}

// Una cadena larga se libera eslabón por eslabón.
impl Drop for Node {
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(mut node) = next {
            next = node.next.take();
        }
    }
}

/// Programa completo: bloques de nivel superior en el orden del editor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Graph {
    roots: Vec<Node>,
}

impl Graph {
    pub fn new(roots: Vec<Node>) -> Self {
        Graph { roots }
    }

    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    pub fn from_json(source: &str) -> Result<Self, GraphError> {
        Self::load(&mut serde_json::Deserializer::from_str(source))
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GraphError> {
        Self::load(&mut serde_json::Deserializer::from_reader(reader))
    }

    pub fn from_value(value: Value) -> Result<Self, GraphError> {
        if !value.is_object() {
            return Err(GraphError::NotAnObject);
        }

        let workspace = RawWorkspace::deserialize(serde_stacker::Deserializer::new(value))?;
        Ok(Self::from_workspace(workspace))
    }

    // Las cadenas de `next` anidan un objeto JSON por bloque, así que el
    // límite de profundidad de serde_json se reemplaza por pila creciente.
    fn load<'de, R>(deserializer: &mut serde_json::Deserializer<R>) -> Result<Self, GraphError>
    where
        R: serde_json::de::Read<'de>,
    {
        deserializer.disable_recursion_limit();

        let document = RawDocument::deserialize(serde_stacker::Deserializer::new(&mut *deserializer))?;
        deserializer.end()?;

        match document {
            RawDocument(Some(workspace)) => Ok(Self::from_workspace(workspace)),
            RawDocument(None) => Err(GraphError::NotAnObject),
        }
    }

    fn from_workspace(workspace: RawWorkspace) -> Self {
        let variables: HashMap<String, String> = workspace
            .variables
            .into_iter()
            .filter_map(|variable| Some((variable.id?, variable.name?)))
            .collect();

        let roots = workspace
            .blocks
            .blocks
            .into_iter()
            .map(|block| block.into_node(&variables))
            .collect();

        Graph { roots }
    }
}

/// Raíz del documento. Solo un objeto describe un espacio de trabajo.
struct RawDocument(Option<RawWorkspace>);

impl<'de> Deserialize<'de> for RawDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Root;

        impl<'de> Visitor<'de> for Root {
            type Value = RawDocument;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a block document")
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<RawDocument, A::Error> {
                let workspace = RawWorkspace::deserialize(MapAccessDeserializer::new(map))?;
                Ok(RawDocument(Some(workspace)))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawDocument, A::Error> {
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(RawDocument(None))
            }

            fn visit_bool<E: de::Error>(self, _: bool) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }

            fn visit_i64<E: de::Error>(self, _: i64) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }

            fn visit_u64<E: de::Error>(self, _: u64) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }

            fn visit_f64<E: de::Error>(self, _: f64) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }

            fn visit_str<E: de::Error>(self, _: &str) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }

            fn visit_unit<E: de::Error>(self) -> Result<RawDocument, E> {
                Ok(RawDocument(None))
            }
        }

        deserializer.deserialize_any(Root)
    }
}

#[derive(Deserialize)]
struct RawWorkspace {
    #[serde(default)]
    blocks: RawBlocks,

    #[serde(default)]
    variables: Vec<RawVariable>,
}

#[derive(Deserialize, Default)]
struct RawBlocks {
    #[serde(default)]
    blocks: Vec<RawBlock>,
}

#[derive(Deserialize)]
struct RawVariable {
    id: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: String,

    #[serde(default)]
    id: Option<String>,

    #[serde(default)]
    fields: BTreeMap<String, Value>,

    #[serde(default)]
    inputs: BTreeMap<String, RawInput>,

    #[serde(default)]
    next: Option<RawInput>,
}

#[derive(Deserialize)]
struct RawInput {
    #[serde(default)]
    block: Option<Box<RawBlock>>,

    #[serde(default)]
    shadow: Option<Box<RawBlock>>,
}

impl RawInput {
    fn into_block(self) -> Option<RawBlock> {
        self.block.or(self.shadow).map(|block| *block)
    }
}

impl RawBlock {
    /// Convierte el bloque y su cadena de sucesores.
    ///
    /// La cadena se recorre en un ciclo; solo las entradas anidadas
    /// recurren.
    fn into_node(mut self, variables: &HashMap<String, String>) -> Node {
        let mut chain = Vec::new();
        let mut next = self.next.take().and_then(RawInput::into_block);

        while let Some(mut block) = next {
            next = block.next.take().and_then(RawInput::into_block);
            chain.push(block.into_single(variables));
        }

        let mut node = self.into_single(variables);
        node.next = chain.into_iter().rev().fold(None, |next, mut node| {
            node.next = next;
            Some(Box::new(node))
        });

        node
    }

    fn into_single(self, variables: &HashMap<String, String>) -> Node {
        let mut node = Node::new(&self.kind);
        node.id = self.id;

        for (name, value) in self.fields {
            if let Some(field) = raw_field(value, variables) {
                node.fields.insert(name, field);
            }
        }

        for (name, input) in self.inputs {
            let child = match input.into_block() {
                Some(block) => ensure_sufficient_stack(|| block.into_node(variables)),
                None => continue,
            };

            if node.kind.is_statement_slot(&name) {
                node.statements.insert(name, child);
            } else {
                node.values.insert(name, child);
            }
        }

        node
    }
}

fn raw_field(value: Value, variables: &HashMap<String, String>) -> Option<Field> {
    match value {
        Value::String(text) => Some(Field::Text(text)),
        Value::Number(number) => number.as_f64().map(Field::Number),
        Value::Bool(value) => Some(Field::Bool(value)),

        // Referencia a variable: `{ "id": ... }`, con o sin nombre embebido
        Value::Object(object) => {
            let name = object.get("name").and_then(Value::as_str).map(str::to_owned);
            let id = object.get("id").and_then(Value::as_str);

            name.or_else(|| id.and_then(|id| variables.get(id).cloned()))
                .or_else(|| id.map(str::to_owned))
                .map(Field::Text)
        }

        Value::Null | Value::Array(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_kinds_are_preserved() {
        let node = Node::new("flipper_teleporter");
        assert_eq!(node.kind(), &NodeKind::Unknown(String::from("flipper_teleporter")));
        assert_eq!(node.kind().as_str(), "flipper_teleporter");
    }

    #[test]
    fn statement_and_value_inputs_are_split() {
        let graph = Graph::from_value(json!({
            "blocks": { "blocks": [{
                "type": "controls_if",
                "inputs": {
                    "IF0": { "block": { "type": "logic_boolean", "fields": { "BOOL": "TRUE" } } },
                    "DO0": { "block": { "type": "flipper_request_redraw" } }
                }
            }]}
        }))
        .unwrap();

        let root = &graph.roots()[0];
        assert!(root.value("IF0").is_some());
        assert!(root.statement("DO0").is_some());
        assert!(root.value("DO0").is_none());
    }

    #[test]
    fn variable_references_resolve_through_the_table() {
        let graph = Graph::from_value(json!({
            "variables": [{ "id": "v1", "name": "score" }],
            "blocks": { "blocks": [{
                "type": "variables_get",
                "fields": { "VAR": { "id": "v1" } }
            }]}
        }))
        .unwrap();

        assert_eq!(graph.roots()[0].field("VAR").as_deref(), Some("score"));
    }

    #[test]
    fn shadows_fill_empty_inputs() {
        let graph = Graph::from_value(json!({
            "blocks": { "blocks": [{
                "type": "flipper_sleep_ms",
                "inputs": { "MS": { "shadow": { "type": "math_number", "fields": { "NUM": 250 } } } }
            }]}
        }))
        .unwrap();

        let ms = graph.roots()[0].value("MS").unwrap();
        assert_eq!(ms.field("NUM").as_deref(), Some("250"));
    }

    #[test]
    fn chains_follow_next() {
        let root = Node::new("flipper_request_redraw")
            .followed_by(Node::new("flipper_sleep_ms"))
            .followed_by(Node::new("flipper_canvas_clear"));

        let second = root.next().unwrap();
        assert_eq!(second.kind(), &NodeKind::SleepMs);
        assert_eq!(second.next().unwrap().kind(), &NodeKind::CanvasClear);
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(matches!(Graph::from_json("[1, 2]"), Err(GraphError::NotAnObject)));
        assert!(matches!(Graph::from_json("{ nope"), Err(GraphError::Json(_))));

        let missing_type = json!({ "blocks": { "blocks": [{ "fields": {} }] } });
        assert!(Graph::from_value(missing_type).is_err());
    }

    fn redraw_chain(length: usize) -> String {
        let mut document = String::from(r#"{ "blocks": { "blocks": ["#);
        for _ in 1..length {
            document.push_str(r#"{ "type": "flipper_request_redraw", "next": { "block": "#);
        }

        document.push_str(r#"{ "type": "flipper_request_redraw" }"#);
        for _ in 1..length {
            document.push_str(" } }");
        }

        document.push_str("] } }");
        document
    }

    #[test]
    fn long_chains_have_no_depth_limit() {
        let document = redraw_chain(2000);
        let links = |graph: &Graph| std::iter::successors(graph.roots().first(), |node| node.next()).count();

        assert_eq!(links(&Graph::from_json(&document).unwrap()), 2000);
        assert_eq!(links(&Graph::from_reader(document.as_bytes()).unwrap()), 2000);

        let value: Value = serde_json::from_str(&redraw_chain(40)).unwrap();
        assert_eq!(links(&Graph::from_value(value).unwrap()), 40);
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(matches!(Graph::from_json("{} {}"), Err(GraphError::Json(_))));
        assert!(matches!(Graph::from_json("\"text\""), Err(GraphError::NotAnObject)));
    }

    #[test]
    fn empty_workspace_is_valid() {
        let graph = Graph::from_json("{}").unwrap();
        assert!(graph.roots().is_empty());
    }

    #[test]
    fn numbers_format_without_trailing_zeros() {
        assert_eq!(format_number(10.0), "10");
        assert_eq!(format_number(-3.0), "-3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "0");
    }
}
