//! Parameter schema synthesis.
//!
//! An operation's input type derives `schemars::JsonSchema`. The generated
//! JSON Schema is walked field by field, in declaration order, and reduced to
//! the flat shape function-calling APIs expect:
//!
//! 1. array of enum values -> `{type: "array", items: {type, enum}}`
//! 2. enum                 -> `{type: "string", enum}`
//! 3. array of scalars     -> `{type: "array", items: {type}}`
//! 4. scalar               -> `{type}`
//!
//! Every property carries its own `description`, empty when the field
//! declares none (a referenced type's doc comment does not count). A field is
//! required when schemars marks it required and its type does not admit null.
//! Output is a pure function of the input schema.

use schemars::JsonSchema;
use serde_json::{Map, Value};

use crate::error::SchemaError;
use crate::types::{FunctionSchema, ItemsSchema, ParamKind, ParametersSchema, PropertySchema};

/// Generate the JSON Schema for `T`.
///
/// Subschemas stay under `definitions` so a type's own doc comment never
/// lands on the fields that use it.
pub fn input_schema_for<T: JsonSchema>() -> Value {
    let settings = schemars::generate::SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = false;
    });
    let generator = settings.into_generator();
    let schema = generator.into_root_schema_for::<T>();
    serde_json::to_value(&schema).unwrap_or_default()
}

/// Synthesize the function schema for an input contract type.
pub fn synthesize<T: JsonSchema>(
    name: &str,
    description: &str,
) -> Result<FunctionSchema, SchemaError> {
    synthesize_from_value(&input_schema_for::<T>(), name, description)
}

/// Synthesize a function schema from an already generated JSON Schema.
pub fn synthesize_from_value(
    contract: &Value,
    name: &str,
    description: &str,
) -> Result<FunctionSchema, SchemaError> {
    let root = contract.as_object().ok_or_else(|| SchemaError::NotAnObject {
        operation: name.to_string(),
    })?;

    let declared_type = root.get("type").and_then(Value::as_str);
    if declared_type.is_some_and(|t| t != "object") {
        return Err(SchemaError::NotAnObject {
            operation: name.to_string(),
        });
    }

    let declared_required: Vec<&str> = root
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut parameters = ParametersSchema::default();

    if let Some(properties) = root.get("properties").and_then(Value::as_object) {
        for (field, field_schema) in properties {
            let (property, nullable) = synthesize_property(root, name, field, field_schema)?;

            let value = serde_json::to_value(&property).map_err(|e| {
                SchemaError::UnresolvableParameterType {
                    operation: name.to_string(),
                    field: field.clone(),
                    detail: e.to_string(),
                }
            })?;
            parameters.properties.insert(field.clone(), value);

            if declared_required.contains(&field.as_str()) && !nullable {
                parameters.required.push(field.clone());
            }
        }
    }

    Ok(FunctionSchema {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    })
}

/// Build one property schema; also reports whether the field admits null.
fn synthesize_property(
    root: &Map<String, Value>,
    operation: &str,
    field: &str,
    schema: &Value,
) -> Result<(PropertySchema, bool), SchemaError> {
    let unresolvable = |detail: &str| SchemaError::UnresolvableParameterType {
        operation: operation.to_string(),
        field: field.to_string(),
        detail: detail.to_string(),
    };

    // Only the field's own keywords; a referenced type's description is not the field's
    let description = description_of(schema).unwrap_or_default();

    let outer = resolve(root, schema).ok_or_else(|| unresolvable("unresolved reference"))?;
    let (inner, nullable) = strip_null(root, &outer);

    let property = if single_type(&inner).as_deref() == Some("array") {
        let items = inner
            .get("items")
            .ok_or_else(|| unresolvable("array without items"))?;
        let items = resolve(root, items).ok_or_else(|| unresolvable("unresolved item reference"))?;
        let (items, _) = strip_null(root, &items);

        let items = match enum_values(&items) {
            Some(values) => ItemsSchema {
                kind: enum_member_kind(&values),
                enum_values: Some(values),
            },
            None => ItemsSchema {
                kind: scalar_kind(&items).ok_or_else(|| unresolvable("array items are not scalar"))?,
                enum_values: None,
            },
        };

        PropertySchema {
            kind: ParamKind::Array,
            description,
            enum_values: None,
            items: Some(items),
        }
    } else if let Some(values) = enum_values(&inner) {
        PropertySchema {
            kind: ParamKind::String,
            description,
            enum_values: Some(values),
            items: None,
        }
    } else {
        PropertySchema {
            kind: scalar_kind(&inner).ok_or_else(|| unresolvable("no scalar type"))?,
            description,
            enum_values: None,
            items: None,
        }
    };

    Ok((property, nullable))
}

/// Follow `$ref` and single-element `allOf` wrappers, keeping outer keywords.
fn resolve(root: &Map<String, Value>, schema: &Value) -> Option<Value> {
    let Value::Object(obj) = schema else {
        return None;
    };

    let mut merged = obj.clone();

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        let target = lookup_ref(root, reference)?;
        merged.remove("$ref");
        merge_missing(&mut merged, &resolve(root, &target)?);
    }

    if let Some(Value::Array(all_of)) = obj.get("allOf") {
        if all_of.len() == 1 {
            merged.remove("allOf");
            merge_missing(&mut merged, &resolve(root, &all_of[0])?);
        }
    }

    Some(Value::Object(merged))
}

fn lookup_ref(root: &Map<String, Value>, reference: &str) -> Option<Value> {
    let path = reference.strip_prefix("#/")?;
    let mut current = root.get(path.split('/').next()?)?;
    for segment in path.split('/').skip(1) {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

fn merge_missing(target: &mut Map<String, Value>, source: &Value) {
    if let Value::Object(source) = source {
        for (key, value) in source {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Remove every way schemars spells "or null". Returns the non-null schema
/// and whether null was admitted.
fn strip_null(root: &Map<String, Value>, schema: &Value) -> (Value, bool) {
    let Value::Object(obj) = schema else {
        return (schema.clone(), false);
    };

    let mut nullable = obj.get("nullable").and_then(Value::as_bool).unwrap_or(false);

    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(branches)) = obj.get(keyword) {
            let (null_branches, rest): (Vec<&Value>, Vec<&Value>) =
                branches.iter().partition(|b| is_null_schema(b));
            if !null_branches.is_empty() && rest.len() == 1 {
                let mut merged = obj.clone();
                merged.remove(keyword);
                if let Some(branch) = resolve(root, rest[0]) {
                    merge_missing(&mut merged, &branch);
                }
                let (inner, _) = strip_null(root, &Value::Object(merged));
                return (inner, true);
            }
            if !null_branches.is_empty() {
                nullable = true;
                let mut merged = obj.clone();
                merged.insert(
                    keyword.to_string(),
                    Value::Array(rest.into_iter().cloned().collect()),
                );
                return (Value::Object(merged), nullable);
            }
        }
    }

    let mut cleaned = obj.clone();

    if let Some(Value::Array(types)) = obj.get("type") {
        let non_null: Vec<Value> = types
            .iter()
            .filter(|t| t.as_str() != Some("null"))
            .cloned()
            .collect();
        if non_null.len() != types.len() {
            nullable = true;
        }
        let replacement = if non_null.len() == 1 {
            non_null[0].clone()
        } else {
            Value::Array(non_null)
        };
        cleaned.insert("type".to_string(), replacement);
    }

    if let Some(Value::Array(values)) = obj.get("enum") {
        if values.iter().any(Value::is_null) {
            nullable = true;
            cleaned.insert(
                "enum".to_string(),
                Value::Array(values.iter().filter(|v| !v.is_null()).cloned().collect()),
            );
        }
    }

    (Value::Object(cleaned), nullable)
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
        || schema.get("const").is_some_and(Value::is_null)
}

fn description_of(schema: &Value) -> Option<String> {
    schema
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn single_type(schema: &Value) -> Option<String> {
    match schema.get("type")? {
        Value::String(t) => Some(t.clone()),
        Value::Array(types) if types.len() == 1 => types[0].as_str().map(str::to_string),
        _ => None,
    }
}

fn scalar_kind(schema: &Value) -> Option<ParamKind> {
    single_type(schema)
        .and_then(|t| ParamKind::from_json_type(&t))
        .filter(ParamKind::is_scalar)
}

/// Collect enum members from `enum`, `const`, or a `oneOf`/`anyOf` of consts.
fn enum_values(schema: &Value) -> Option<Vec<Value>> {
    if let Some(Value::Array(values)) = schema.get("enum") {
        let values: Vec<Value> = values.iter().filter(|v| !v.is_null()).cloned().collect();
        return (!values.is_empty()).then_some(values);
    }

    if let Some(value) = schema.get("const") {
        return (!value.is_null()).then(|| vec![value.clone()]);
    }

    for keyword in ["oneOf", "anyOf"] {
        if let Some(Value::Array(branches)) = schema.get(keyword) {
            let mut values = Vec::new();
            for branch in branches {
                values.extend(enum_values(branch)?);
            }
            return (!values.is_empty()).then_some(values);
        }
    }

    None
}

/// Item type of an enum array follows its first member.
fn enum_member_kind(values: &[Value]) -> ParamKind {
    match values.first() {
        Some(v) if v.is_i64() || v.is_u64() => ParamKind::Integer,
        Some(Value::Number(_)) => ParamKind::Number,
        Some(Value::Bool(_)) => ParamKind::Boolean,
        _ => ParamKind::String,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
    enum Unit {
        #[default]
        Celsius,
        Fahrenheit,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct WeatherInput {
        /// The city and state, e.g. San Francisco, CA.
        location: String,
        /// The unit of temperature.
        #[serde(default)]
        unit: Unit,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct KitchenSink {
        /// Days to look ahead
        days: u8,
        /// Optional unit
        unit: Option<Unit>,
        /// Several units
        units: Vec<Unit>,
        tags: Vec<String>,
        #[serde(default)]
        verbose: bool,
        ratio: Option<f64>,
    }

    /// How hard to try
    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "lowercase")]
    enum Mode {
        Fast,
        Slow,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Tuning {
        #[serde(default)]
        quiet: Option<Mode>,
        plain: Mode,
        /// Mode for retries
        retry: Mode,
        modes: Vec<Mode>,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Nested {
        inner: WeatherInput,
    }

    #[test]
    fn test_weather_schema() {
        let schema = synthesize::<WeatherInput>(
            "get_current_weather",
            "Get the current weather in a given location.",
        )
        .unwrap();

        assert_eq!(schema.name, "get_current_weather");
        assert_eq!(schema.parameters.schema_type, "object");
        assert_eq!(schema.parameters.required, vec!["location".to_string()]);

        let location = schema.property("location").unwrap();
        assert_eq!(location.kind, ParamKind::String);
        assert_eq!(location.description, "The city and state, e.g. San Francisco, CA.");

        let unit = schema.property("unit").unwrap();
        assert_eq!(unit.kind, ParamKind::String);
        assert_eq!(unit.description, "The unit of temperature.");
        assert_eq!(unit.enum_values, Some(vec![json!("Celsius"), json!("Fahrenheit")]));
    }

    #[test]
    fn test_field_order_and_rules() {
        let schema = synthesize::<KitchenSink>("sink", "Everything").unwrap();

        let keys: Vec<&String> = schema.parameters.properties.keys().collect();
        assert_eq!(keys, ["days", "unit", "units", "tags", "verbose", "ratio"]);

        assert_eq!(
            schema.parameters.required,
            vec!["days".to_string(), "units".to_string(), "tags".to_string()]
        );

        assert_eq!(schema.property("days").unwrap().kind, ParamKind::Integer);

        let unit = schema.property("unit").unwrap();
        assert_eq!(unit.kind, ParamKind::String);
        assert_eq!(unit.enum_values, Some(vec![json!("Celsius"), json!("Fahrenheit")]));

        let units = schema.property("units").unwrap();
        assert_eq!(units.kind, ParamKind::Array);
        assert_eq!(
            units.items,
            Some(ItemsSchema {
                kind: ParamKind::String,
                enum_values: Some(vec![json!("Celsius"), json!("Fahrenheit")]),
            })
        );

        let tags = schema.property("tags").unwrap();
        assert_eq!(tags.description, "");
        assert_eq!(
            tags.items,
            Some(ItemsSchema {
                kind: ParamKind::String,
                enum_values: None
            })
        );

        assert_eq!(schema.property("verbose").unwrap().kind, ParamKind::Boolean);
        assert_eq!(schema.property("ratio").unwrap().kind, ParamKind::Number);
    }

    #[test]
    fn test_type_doc_is_not_field_description() {
        let schema = synthesize::<Tuning>("tune", "").unwrap();

        let quiet = schema.property("quiet").unwrap();
        assert_eq!(quiet.description, "");
        assert_eq!(quiet.enum_values, Some(vec![json!("fast"), json!("slow")]));
        assert!(!schema.is_required("quiet"));

        assert_eq!(schema.property("plain").unwrap().description, "");
        assert_eq!(schema.property("retry").unwrap().description, "Mode for retries");
        assert!(schema.is_required("retry"));

        let modes = schema.property("modes").unwrap();
        assert_eq!(modes.description, "");
        assert_eq!(
            modes.items,
            Some(ItemsSchema {
                kind: ParamKind::String,
                enum_values: Some(vec![json!("fast"), json!("slow")]),
            })
        );
    }

    #[test]
    fn test_deterministic_output() {
        let first = serde_json::to_string(&synthesize::<KitchenSink>("sink", "d").unwrap()).unwrap();
        for _ in 0..5 {
            let again =
                serde_json::to_string(&synthesize::<KitchenSink>("sink", "d").unwrap()).unwrap();
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_integer_enum_array_items() {
        let contract = json!({
            "type": "object",
            "properties": {
                "sides": {
                    "type": "array",
                    "description": "Dice to roll",
                    "items": { "enum": [4, 6, 20] }
                }
            },
            "required": ["sides"]
        });

        let schema = synthesize_from_value(&contract, "roll", "Roll dice").unwrap();
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "roll",
                "description": "Roll dice",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "sides": {
                            "type": "array",
                            "description": "Dice to roll",
                            "items": { "type": "integer", "enum": [4, 6, 20] }
                        }
                    },
                    "required": ["sides"]
                }
            })
        );
    }

    #[test]
    fn test_enum_array_item_kind_follows_first_member() {
        let contract = json!({
            "type": "object",
            "properties": {
                "ratios": { "type": "array", "items": { "enum": [0.5, 1.5] } },
                "flags": { "type": "array", "items": { "enum": [true, false] } },
                "words": { "type": "array", "items": { "enum": ["a", "b"] } }
            }
        });

        let schema = synthesize_from_value(&contract, "kinds", "").unwrap();
        let kind = |field: &str| schema.property(field).unwrap().items.unwrap().kind;
        assert_eq!(kind("ratios"), ParamKind::Number);
        assert_eq!(kind("flags"), ParamKind::Boolean);
        assert_eq!(kind("words"), ParamKind::String);
    }

    #[test]
    fn test_nullable_spellings() {
        let contract = json!({
            "type": "object",
            "properties": {
                "a": { "type": ["string", "null"] },
                "b": { "anyOf": [{ "type": "integer" }, { "type": "null" }], "description": "B" },
                "c": { "enum": ["x", "y", null] },
                "d": { "type": "boolean", "nullable": true }
            },
            "required": ["a", "b", "c", "d"]
        });

        let schema = synthesize_from_value(&contract, "n", "").unwrap();
        assert!(schema.parameters.required.is_empty());
        assert_eq!(schema.property("a").unwrap().kind, ParamKind::String);
        let b = schema.property("b").unwrap();
        assert_eq!(b.kind, ParamKind::Integer);
        assert_eq!(b.description, "B");
        assert_eq!(
            schema.property("c").unwrap().enum_values,
            Some(vec![json!("x"), json!("y")])
        );
        assert_eq!(schema.property("d").unwrap().kind, ParamKind::Boolean);
    }

    #[test]
    fn test_one_of_consts_become_enum() {
        let contract = json!({
            "type": "object",
            "properties": {
                "mode": {
                    "oneOf": [
                        { "type": "string", "const": "fast", "description": "Quick" },
                        { "type": "string", "const": "slow", "description": "Careful" }
                    ]
                }
            }
        });

        let schema = synthesize_from_value(&contract, "m", "").unwrap();
        let mode = schema.property("mode").unwrap();
        assert_eq!(mode.kind, ParamKind::String);
        assert_eq!(mode.enum_values, Some(vec![json!("fast"), json!("slow")]));
    }

    #[test]
    fn test_refs_are_followed() {
        let contract = json!({
            "type": "object",
            "properties": {
                "unit": { "$ref": "#/$defs/Unit", "description": "Which unit" }
            },
            "required": ["unit"],
            "$defs": {
                "Unit": { "type": "string", "enum": ["C", "F"] }
            }
        });

        let schema = synthesize_from_value(&contract, "r", "").unwrap();
        let unit = schema.property("unit").unwrap();
        assert_eq!(unit.description, "Which unit");
        assert_eq!(unit.enum_values, Some(vec![json!("C"), json!("F")]));
        assert!(schema.is_required("unit"));
    }

    #[test]
    fn test_nested_object_is_unresolvable() {
        let err = synthesize::<Nested>("nested", "").unwrap_err();
        match err {
            SchemaError::UnresolvableParameterType { operation, field, .. } => {
                assert_eq!(operation, "nested");
                assert_eq!(field, "inner");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_untyped_field_is_unresolvable() {
        let contract = json!({
            "type": "object",
            "properties": { "anything": {} }
        });
        assert!(matches!(
            synthesize_from_value(&contract, "x", ""),
            Err(SchemaError::UnresolvableParameterType { .. })
        ));
    }

    #[test]
    fn test_non_object_contract_rejected() {
        assert!(matches!(
            synthesize_from_value(&json!({"type": "string"}), "x", ""),
            Err(SchemaError::NotAnObject { .. })
        ));
        assert!(matches!(
            synthesize_from_value(&json!(true), "x", ""),
            Err(SchemaError::NotAnObject { .. })
        ));
    }
}
