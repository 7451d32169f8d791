//! Agent registry and tool-schema synthesis
//!
//! Agents declare their input fields through a builder API; the registry
//! maps each agent name to a factory plus the declared schema. The tool
//! schema exposed to the LLM is a pure function over that declaration.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use super::agent::{Agent, AgentAction, StateAgent};
use super::domain::ToolSchema;

/// Declared type of an input field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
}

impl FieldType {
    /// JSON Schema type name
    pub fn json_type(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "integer",
            FieldType::Float => "number",
            FieldType::Bool => "boolean",
        }
    }

    /// Stable name used in the schema-version hash
    pub fn type_name(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Bool => "bool",
        }
    }

    /// Check that a JSON value matches this declared type
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
        }
    }

    /// Parse a user-typed answer into a value of this type
    pub fn parse_text(self, text: &str) -> Result<Value, String> {
        let text = text.trim();
        match self {
            FieldType::String => Ok(Value::String(text.to_string())),
            FieldType::Int => text
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not a whole number", text)),
            FieldType::Float => text
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("'{}' is not a number", text)),
            FieldType::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "y" => Ok(Value::Bool(true)),
                "false" | "no" | "n" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not yes/no", text)),
            },
        }
    }
}

/// Validation callback: `Ok(())` when the value is acceptable
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Declared input field of an agent
#[derive(Clone)]
pub struct InputField {
    /// Field name (the tool-schema property name)
    pub name: String,
    /// Declared type
    pub field_type: FieldType,
    /// Question asked when the field must be collected from the user
    pub prompt: String,
    /// Description surfaced in the tool schema (defaults to the prompt)
    pub description: String,
    /// Whether the field must be present before the agent can act
    pub required: bool,
    /// Default value for optional fields
    pub default: Option<Value>,
    /// Optional validation callback
    pub validator: Option<Validator>,
    /// Constraint summary appended to the schema description
    pub validator_hint: Option<String>,
}

impl std::fmt::Debug for InputField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputField")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .finish()
    }
}

impl InputField {
    /// Required string field
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        Self {
            name: name.into(),
            field_type: FieldType::String,
            description: prompt.clone(),
            prompt,
            required: true,
            default: None,
            validator: None,
            validator_hint: None,
        }
    }

    /// Set the declared type
    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    /// Mark the field optional, with a default
    pub fn optional(mut self, default: Option<Value>) -> Self {
        self.required = false;
        self.default = default;
        self
    }

    /// Override the schema description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach a validator and its human-readable constraint summary
    pub fn with_validator(
        mut self,
        validator: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
        hint: impl Into<String>,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self.validator_hint = Some(hint.into());
        self
    }

    /// Run the validator, if any
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match &self.validator {
            Some(v) => v(value),
            None => Ok(()),
        }
    }
}

/// Registry record describing one agent type
#[derive(Clone)]
pub struct AgentSpec {
    /// Agent type name (also the tool name)
    pub name: String,
    /// Description surfaced in the tool schema
    pub description: String,
    /// Declared input fields
    pub input_fields: Vec<InputField>,
    /// Whether the agent must be approved before acting
    pub needs_approval: bool,
    /// Whether the agent is exposed to the planner as a tool
    pub expose_as_tool: bool,
}

impl std::fmt::Debug for AgentSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSpec")
            .field("name", &self.name)
            .field("needs_approval", &self.needs_approval)
            .field("expose_as_tool", &self.expose_as_tool)
            .field("input_fields", &self.input_fields)
            .finish()
    }
}

impl AgentSpec {
    /// Spec with no fields, exposed as a tool, no approval
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_fields: Vec::new(),
            needs_approval: false,
            expose_as_tool: true,
        }
    }

    /// Add an input field
    pub fn with_field(mut self, field: InputField) -> Self {
        self.input_fields.push(field);
        self
    }

    /// Require user confirmation before the agent acts
    pub fn with_approval(mut self) -> Self {
        self.needs_approval = true;
        self
    }

    /// Hide the agent from the planner's tool catalog
    pub fn hidden(mut self) -> Self {
        self.expose_as_tool = false;
        self
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.input_fields.iter().find(|f| f.name == name)
    }

    /// Deterministic schema version over the declared fields
    ///
    /// Hash of (name, type, required) tuples sorted by name. Adding,
    /// removing, or retyping a field changes the version; editing prompts
    /// or descriptions does not.
    pub fn schema_version(&self) -> u32 {
        let mut parts: Vec<String> = self
            .input_fields
            .iter()
            .map(|f| format!("{}:{}:{}", f.name, f.field_type.type_name(), f.required))
            .collect();
        parts.sort();

        let digest = Sha256::digest(parts.join("|").as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Synthesize the tool schema from the declared fields
    ///
    /// Every agent tool also accepts a free-form `task_instruction` string
    /// for context that does not map to a specific field.
    pub fn tool_schema(&self) -> ToolSchema {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for field in &self.input_fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": field.field_type.json_type(),
                    "description": field.description,
                }),
            );
            if field.required {
                required.push(field.name.clone());
            }
        }

        properties.insert(
            "task_instruction".to_string(),
            json!({
                "type": "string",
                "description": "Natural language instructions for the agent. \
                    Use this to pass context that doesn't map to specific input fields.",
            }),
        );

        ToolSchema::new(
            &self.name,
            &self.description,
            json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        )
    }

    /// Tool schema enhanced for the planner
    ///
    /// Validator hints are appended to field descriptions, and agents that
    /// need approval advertise it in the tool description.
    pub fn enhanced_tool_schema(&self) -> ToolSchema {
        let mut schema = self.tool_schema();

        if let Some(props) = schema
            .parameters
            .get_mut("properties")
            .and_then(Value::as_object_mut)
        {
            for field in &self.input_fields {
                let Some(hint) = &field.validator_hint else {
                    continue;
                };
                if let Some(prop) = props.get_mut(&field.name) {
                    let existing = prop
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    prop["description"] = json!(format!("{} ({})", existing, hint));
                }
            }
        }

        if self.needs_approval {
            schema.description =
                format!("{} [Requires user confirmation before execution]", schema.description);
        }

        schema
    }
}

/// Factory producing a fresh agent instance for a tenant
pub type AgentFactory = Arc<dyn Fn(&str) -> Box<dyn Agent> + Send + Sync>;

struct RegistryEntry {
    spec: AgentSpec,
    factory: AgentFactory,
}

/// Maps agent names to specs and factories
///
/// Read-mostly: populated at startup and injected into the orchestrator;
/// runtime mutation is not part of the contract.
#[derive(Default)]
pub struct AgentRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl AgentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stateful agent driven by the built-in state machine
    pub fn register(&mut self, spec: AgentSpec, action: Arc<dyn AgentAction>) {
        let factory_spec = spec.clone();
        let factory: AgentFactory = Arc::new(move |tenant_id| {
            Box::new(StateAgent::new(factory_spec.clone(), action.clone(), tenant_id))
        });
        self.register_with_factory(spec, factory);
    }

    /// Register an agent with a custom factory
    pub fn register_with_factory(&mut self, spec: AgentSpec, factory: AgentFactory) {
        tracing::debug!(agent = %spec.name, version = spec.schema_version(), "registered agent");
        self.entries
            .insert(spec.name.clone(), RegistryEntry { spec, factory });
    }

    /// Look up a spec by agent name
    pub fn spec(&self, name: &str) -> Option<&AgentSpec> {
        self.entries.get(name).map(|e| &e.spec)
    }

    /// Current schema version for an agent type
    pub fn schema_version(&self, name: &str) -> Option<u32> {
        self.spec(name).map(AgentSpec::schema_version)
    }

    /// Instantiate a fresh agent for a tenant
    pub fn instantiate(&self, name: &str, tenant_id: &str) -> Option<Box<dyn Agent>> {
        self.entries.get(name).map(|e| (e.factory)(tenant_id))
    }

    /// Enhanced tool schemas for every agent with `expose_as_tool`
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .entries
            .values()
            .filter(|e| e.spec.expose_as_tool)
            .map(|e| e.spec.enhanced_tool_schema())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// All registered agent names
    pub fn agent_names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email_spec() -> AgentSpec {
        AgentSpec::new("send_email", "Send an email on the user's behalf")
            .with_field(InputField::new("recipient", "Who should I send to?").with_validator(
                |v| {
                    if v.as_str().is_some_and(|s| s.contains('@')) {
                        Ok(())
                    } else {
                        Err("must be an email address".into())
                    }
                },
                "must contain @",
            ))
            .with_field(InputField::new("subject", "What's the subject?"))
            .with_field(InputField::new("body", "What should the email say?"))
            .with_approval()
    }

    #[test]
    fn schema_version_is_stable_and_order_independent() {
        let a = email_spec();
        let mut b = email_spec();
        b.input_fields.reverse();
        assert_eq!(a.schema_version(), b.schema_version());
    }

    #[test]
    fn schema_version_changes_with_fields() {
        let base = email_spec();
        let grown = email_spec().with_field(InputField::new("cc", "CC anyone?"));
        assert_ne!(base.schema_version(), grown.schema_version());

        let mut retyped = email_spec();
        retyped.input_fields[1].field_type = FieldType::Int;
        assert_ne!(base.schema_version(), retyped.schema_version());

        // Prompt edits do not bump the version
        let mut reworded = email_spec();
        reworded.input_fields[1].prompt = "Subject line?".into();
        assert_eq!(base.schema_version(), reworded.schema_version());
    }

    #[test]
    fn tool_schema_includes_fields_and_task_instruction() {
        let schema = email_spec().tool_schema();
        assert_eq!(schema.name, "send_email");
        let props = schema.parameters["properties"].as_object().unwrap();
        assert!(props.contains_key("recipient"));
        assert!(props.contains_key("task_instruction"));
        let required = schema.parameters["required"].as_array().unwrap();
        assert_eq!(required.len(), 3);
    }

    #[test]
    fn enhanced_schema_carries_hints_and_approval_marker() {
        let schema = email_spec().enhanced_tool_schema();
        assert!(schema
            .description
            .ends_with("[Requires user confirmation before execution]"));
        let desc = schema.parameters["properties"]["recipient"]["description"]
            .as_str()
            .unwrap();
        assert!(desc.contains("must contain @"));
    }

    #[test]
    fn field_type_parsing() {
        assert_eq!(FieldType::Int.parse_text("42").unwrap(), Value::from(42));
        assert!(FieldType::Int.parse_text("forty-two").is_err());
        assert_eq!(
            FieldType::Bool.parse_text("yes").unwrap(),
            Value::Bool(true)
        );
        assert!(FieldType::Float.accepts(&Value::from(1)));
        assert!(!FieldType::Int.accepts(&Value::from("1")));
    }
}
