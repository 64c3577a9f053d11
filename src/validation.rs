//! Input parameter validation plan (spec §4.4 step 2, §9 "ad-hoc structural typing").
//!
//! Parsed once per endpoint at construction time into a [`ValidationPlan`];
//! schema-level inconsistencies (a parameter both `required` and carrying a
//! `default`, a dangling `dependsOn`/`exclusive` name, a duplicate alias)
//! are rejected there rather than discovered per-request.

use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::error::{AdapterError, Result};

/// Declared type of one input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// Descriptor for a single declared parameter, as written by endpoint authors.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub options: Option<Vec<Value>>,
    pub aliases: Vec<String>,
    pub depends_on: Vec<String>,
    pub exclusive: Vec<String>,
}

impl ParamSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: None,
            options: None,
            aliases: Vec::new(),
            depends_on: Vec::new(),
            exclusive: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn with_exclusive(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.exclusive = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_depends_on(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_aliases(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.aliases = names.into_iter().map(Into::into).collect();
        self
    }
}

/// A compiled, internally-consistent validation plan for one endpoint.
///
/// Construction fails fast on schema authoring mistakes (spec §4.4
/// invariants) rather than deferring them to the first request.
pub struct ValidationPlan {
    params: Vec<ParamSpec>,
    /// alias/name -> index into `params`, built once so lookups during
    /// request validation are O(1) instead of a linear scan per alias.
    name_index: HashMap<String, usize>,
}

impl ValidationPlan {
    /// # Errors
    ///
    /// Returns [`AdapterError::Internal`] if the schema itself is
    /// inconsistent: a required parameter with a default, a `dependsOn`/
    /// `exclusive` reference to an undeclared parameter, or a duplicate
    /// alias/name.
    pub fn new(params: Vec<ParamSpec>) -> Result<Self> {
        let mut name_index = HashMap::new();
        let declared: HashSet<&str> = params.iter().map(|p| p.name.as_str()).collect();

        for (idx, spec) in params.iter().enumerate() {
            if spec.required && spec.default.is_some() {
                return Err(AdapterError::Internal(format!(
                    "parameter {:?} cannot be both required and carry a default",
                    spec.name
                )));
            }

            for dep in spec.depends_on.iter().chain(spec.exclusive.iter()) {
                if !declared.contains(dep.as_str()) {
                    return Err(AdapterError::Internal(format!(
                        "parameter {:?} references undeclared parameter {:?} in dependsOn/exclusive",
                        spec.name, dep
                    )));
                }
            }

            for key in std::iter::once(spec.name.as_str()).chain(spec.aliases.iter().map(String::as_str)) {
                if name_index.insert(key.to_string(), idx).is_some() {
                    return Err(AdapterError::Internal(format!(
                        "duplicate parameter name or alias {key:?} within endpoint"
                    )));
                }
            }
        }

        Ok(Self { params, name_index })
    }

    /// Validate and normalize a request's raw parameter object, applying
    /// defaults and resolving aliases to canonical names.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidInput`] on a missing required
    /// parameter, a type mismatch, an unrecognized `options` value, or an
    /// `exclusive` conflict (spec §8 scenarios 2-4).
    pub fn validate(&self, raw: &Value) -> Result<Value> {
        let input = raw.as_object().cloned().unwrap_or_default();
        let mut resolved = serde_json::Map::new();

        for (key, value) in &input {
            if let Some(&idx) = self.name_index.get(key) {
                let canonical = &self.params[idx].name;
                resolved.insert(canonical.clone(), value.clone());
            }
        }

        let mut out = serde_json::Map::new();
        for spec in &self.params {
            let present = resolved.get(&spec.name);
            let value = match present {
                Some(v) => v.clone(),
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None => {
                        if spec.required {
                            return Err(AdapterError::invalid_input(format!(
                                "missing required parameter {:?}",
                                spec.name
                            )));
                        }
                        continue;
                    }
                },
            };

            if !spec.param_type.matches(&value) {
                return Err(AdapterError::invalid_input(format!(
                    "parameter {:?} must be of type {}",
                    spec.name,
                    spec.param_type.name()
                )));
            }

            if let Some(options) = &spec.options {
                if !options.contains(&value) {
                    return Err(AdapterError::invalid_input(format!(
                        "parameter {:?} must be one of {:?}",
                        spec.name, options
                    )));
                }
            }

            for other in &spec.exclusive {
                if resolved.contains_key(other) {
                    return Err(AdapterError::invalid_input(format!(
                        "parameter {:?} is exclusive with {:?}",
                        spec.name, other
                    )));
                }
            }

            for dep in &spec.depends_on {
                if !resolved.contains_key(dep) && !out.contains_key(dep) {
                    return Err(AdapterError::invalid_input(format!(
                        "parameter {:?} requires {:?} to also be present",
                        spec.name, dep
                    )));
                }
            }

            out.insert(spec.name.clone(), value);
        }

        Ok(Value::Object(out))
    }
}
