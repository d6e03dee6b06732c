//! Schema derivation for components that declare their contract at mount
//! time instead of through the static registry.

use serde_json::Value;

use super::{ComponentManifest, PatchSchema, PropMap, PropSchema, PropType, SchemaKind};

/// Infer a property type from its current value. Anything that is not a
/// number or a boolean (including a missing value) is treated as a string.
fn infer_type(value: Option<&Value>) -> PropType {
    match value {
        Some(Value::Number(_)) => PropType::Number,
        Some(Value::Bool(_)) => PropType::Boolean,
        _ => PropType::String,
    }
}

/// Build the patch schema for a self-describing instance.
///
/// Every writable prop is required and no additional properties are
/// allowed. When `context` carries an array under a prop's name, that array
/// becomes the prop's enumeration.
pub fn derive_schema(
    current_props: &PropMap,
    writable_props: &[String],
    context: Option<&PropMap>,
) -> PatchSchema {
    let properties = writable_props
        .iter()
        .map(|name| {
            let mut schema = PropSchema::of(infer_type(current_props.get(name)));
            if let Some(Value::Array(options)) = context.and_then(|c| c.get(name)) {
                schema.allowed = Some(options.clone());
            }
            (name.clone(), schema)
        })
        .collect();

    PatchSchema {
        kind: SchemaKind::Object,
        properties,
        required: writable_props.to_vec(),
        additional_properties: false,
    }
}

/// Derive an ephemeral manifest from a mounted instance.
///
/// Returns `None` unless the instance declares both a non-empty description
/// and its writable props.
pub fn derive_manifest(instance: &super::MountedInstance) -> Option<ComponentManifest> {
    let description = instance.description.as_ref().filter(|d| !d.is_empty())?;
    let writable = instance.writable_props.as_ref()?;

    let mut seen = Vec::with_capacity(writable.len());
    for prop in writable {
        if !seen.contains(prop) {
            seen.push(prop.clone());
        }
    }

    let schema = derive_schema(&instance.current_props, &seen, instance.context.as_ref());
    Some(ComponentManifest::new(
        instance.key.clone(),
        description.clone(),
        seen,
        schema,
    ))
}
