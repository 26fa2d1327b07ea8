//! Response-shape contract.
//!
//! Schemas are built once as a dialect-neutral [`SchemaNode`] tree and then
//! rendered for the provider in use: Gemini's OpenAPI subset
//! (`"type": "OBJECT"`, `nullable`) or plain JSON Schema
//! (`"type": ["string", "null"]`).
//!
//! Each mode owns one sub-schema. A single active mode uses its sub-schema
//! as the top-level object; several active modes use the union object whose
//! three branches are all nullable, inactive ones expected as `null`.

use serde_json::{json, Map, Value};

use crate::models::{AnalysisMode, ModeSet};

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String { nullable: bool },
    Integer { nullable: bool },
    Array(Box<SchemaNode>),
    Object {
        properties: Vec<(&'static str, SchemaNode)>,
        required: Vec<&'static str>,
        nullable: bool,
    },
}

/// Provider dialect for [`SchemaNode::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDialect {
    Gemini,
    JsonSchema,
}

fn string() -> SchemaNode {
    SchemaNode::String { nullable: false }
}

fn nullable_string() -> SchemaNode {
    SchemaNode::String { nullable: true }
}

fn page() -> SchemaNode {
    SchemaNode::Integer { nullable: true }
}

fn array(item: SchemaNode) -> SchemaNode {
    SchemaNode::Array(Box::new(item))
}

fn object(properties: Vec<(&'static str, SchemaNode)>, required: Vec<&'static str>) -> SchemaNode {
    SchemaNode::Object {
        properties,
        required,
        nullable: false,
    }
}

impl SchemaNode {
    fn into_nullable(self) -> SchemaNode {
        match self {
            SchemaNode::String { .. } => SchemaNode::String { nullable: true },
            SchemaNode::Integer { .. } => SchemaNode::Integer { nullable: true },
            SchemaNode::Object {
                properties,
                required,
                ..
            } => SchemaNode::Object {
                properties,
                required,
                nullable: true,
            },
            array => array,
        }
    }

    pub fn render(&self, dialect: SchemaDialect) -> Value {
        match dialect {
            SchemaDialect::Gemini => self.render_gemini(),
            SchemaDialect::JsonSchema => self.render_json_schema(),
        }
    }

    fn render_gemini(&self) -> Value {
        match self {
            SchemaNode::String { nullable } => with_nullable(json!({ "type": "STRING" }), *nullable),
            SchemaNode::Integer { nullable } => {
                with_nullable(json!({ "type": "INTEGER" }), *nullable)
            }
            SchemaNode::Array(item) => json!({ "type": "ARRAY", "items": item.render_gemini() }),
            SchemaNode::Object {
                properties,
                required,
                nullable,
            } => {
                let mut props = Map::new();
                for (name, node) in properties {
                    props.insert((*name).to_string(), node.render_gemini());
                }
                let ordering: Vec<&str> = properties.iter().map(|(n, _)| *n).collect();
                with_nullable(
                    json!({
                        "type": "OBJECT",
                        "properties": props,
                        "required": required,
                        "propertyOrdering": ordering,
                    }),
                    *nullable,
                )
            }
        }
    }

    fn render_json_schema(&self) -> Value {
        match self {
            SchemaNode::String { nullable } => json!({ "type": json_type("string", *nullable) }),
            SchemaNode::Integer { nullable } => json!({ "type": json_type("integer", *nullable) }),
            SchemaNode::Array(item) => json!({ "type": "array", "items": item.render_json_schema() }),
            SchemaNode::Object {
                properties,
                required,
                nullable,
            } => {
                let mut props = Map::new();
                for (name, node) in properties {
                    props.insert((*name).to_string(), node.render_json_schema());
                }
                json!({
                    "type": json_type("object", *nullable),
                    "properties": props,
                    "required": required,
                })
            }
        }
    }
}

fn with_nullable(mut value: Value, nullable: bool) -> Value {
    if nullable {
        if let Some(obj) = value.as_object_mut() {
            obj.insert("nullable".to_string(), Value::Bool(true));
        }
    }
    value
}

fn json_type(name: &str, nullable: bool) -> Value {
    if nullable {
        json!([name, "null"])
    } else {
        json!(name)
    }
}

/// Key of a mode's branch in the union object.
pub fn group_key(mode: AnalysisMode) -> &'static str {
    match mode {
        AnalysisMode::Phenomenological => "analise_fenomenologica",
        AnalysisMode::Thematic => "analise_tematica",
        AnalysisMode::Systematic => "mapeamento_sistematico",
    }
}

/// Sub-schema owned by one mode.
pub fn mode_schema(mode: AnalysisMode) -> SchemaNode {
    match mode {
        AnalysisMode::Phenomenological => phenomenological_schema(),
        AnalysisMode::Thematic => thematic_schema(),
        AnalysisMode::Systematic => systematic_schema(),
    }
}

fn phenomenological_schema() -> SchemaNode {
    let sense_unit = object(
        vec![
            ("id_unidade", string()),
            ("documento", string()),
            ("pagina", page()),
            ("citacao_literal", string()),
            ("contexto_resumido", nullable_string()),
            ("justificativa", nullable_string()),
        ],
        vec!["id_unidade", "documento", "pagina", "citacao_literal"],
    );
    let meaning_unit = object(
        vec![
            ("id_unidade", string()),
            ("documento", string()),
            ("trecho_original", string()),
            ("sintese", string()),
        ],
        vec!["id_unidade", "documento", "trecho_original", "sintese"],
    );
    let category = object(
        vec![
            ("nome", string()),
            ("descricao", string()),
            ("unidades_relacionadas", array(string())),
        ],
        vec!["nome", "descricao", "unidades_relacionadas"],
    );
    object(
        vec![
            ("unidades_sentido", array(sense_unit)),
            ("unidades_significado", array(meaning_unit)),
            ("categorias", array(category)),
        ],
        vec!["unidades_sentido", "unidades_significado", "categorias"],
    )
}

fn thematic_schema() -> SchemaNode {
    let code = object(
        vec![
            ("id_codigo", string()),
            ("documento", string()),
            ("pagina", page()),
            ("trecho_literal", string()),
            ("nome_codigo", string()),
            ("definicao_codigo", string()),
        ],
        vec![
            "id_codigo",
            "documento",
            "pagina",
            "trecho_literal",
            "nome_codigo",
            "definicao_codigo",
        ],
    );
    let theme = object(
        vec![
            ("nome_tema", string()),
            ("descricao", string()),
            ("codigos_relacionados", array(string())),
            ("interpretacao", string()),
        ],
        vec!["nome_tema", "descricao", "codigos_relacionados", "interpretacao"],
    );
    object(
        vec![("codigos", array(code)), ("temas", array(theme))],
        vec!["codigos", "temas"],
    )
}

fn systematic_schema() -> SchemaNode {
    let answer = object(
        vec![
            ("pergunta", string()),
            ("resposta", string()),
            ("evidencia_textual", string()),
            ("pagina", page()),
        ],
        vec!["pergunta", "resposta", "evidencia_textual", "pagina"],
    );
    let document = object(
        vec![("document", string()), ("respostas", array(answer))],
        vec!["document", "respostas"],
    );
    object(vec![("documents", array(document))], vec!["documents"])
}

/// Union of all three branches, each nullable.
pub fn union_schema() -> SchemaNode {
    let properties: Vec<(&'static str, SchemaNode)> = AnalysisMode::ALL
        .into_iter()
        .map(|m| (group_key(m), mode_schema(m).into_nullable()))
        .collect();
    let required = AnalysisMode::ALL.into_iter().map(group_key).collect();
    object(properties, required)
}

/// Schema for a run with the given active modes.
pub fn response_schema(modes: ModeSet) -> SchemaNode {
    match modes.single() {
        Some(mode) => mode_schema(mode),
        None => union_schema(),
    }
}
