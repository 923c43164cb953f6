use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MethodParam {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodReturns {
    #[serde(rename = "type")]
    pub return_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub params: Vec<MethodParam>,
    pub returns: MethodReturns,
}

impl MethodDescriptor {
    pub fn new() -> Self {
        Self {
            documentation: None,
            params: Vec::new(),
            returns: MethodReturns {
                return_types: Vec::new(),
            },
        }
    }

    pub fn documented(mut self, documentation: impl Into<String>) -> Self {
        self.documentation = Some(documentation.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.params.push(MethodParam {
            name: name.into(),
            param_type: param_type.into(),
            documentation: None,
            optional: false,
        });
        self
    }

    pub fn optional_param(mut self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.params.push(MethodParam {
            name: name.into(),
            param_type: param_type.into(),
            documentation: None,
            optional: true,
        });
        self
    }

    pub fn returns(mut self, types: &[&str]) -> Self {
        self.returns.return_types = types.iter().map(|t| t.to_string()).collect();
        self
    }
}

impl Default for MethodDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventDescriptor {
    pub params: Vec<String>,
}

/// What a device announces about itself: the callable surface of one service.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    pub methods: BTreeMap<String, MethodDescriptor>,
    pub events: BTreeMap<String, EventDescriptor>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: version.into(),
            methods: BTreeMap::new(),
            events: BTreeMap::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn method(mut self, name: impl Into<String>, descriptor: MethodDescriptor) -> Self {
        self.methods.insert(name.into(), descriptor);
        self
    }

    pub fn event(mut self, name: impl Into<String>, params: &[&str]) -> Self {
        self.events.insert(
            name.into(),
            EventDescriptor {
                params: params.iter().map(|p| p.to_string()).collect(),
            },
        );
        self
    }
}
