use std::collections::HashMap;
use std::fmt;

/// A URI template with full-segment variables, e.g.
/// `/sites/{site_id}/assets/{asset_id}`. Variables bind one complete path
/// segment; literals compare case-sensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UriTemplate {
    template: String,
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriTemplateError {
    #[error("malformed template segment '{0}': variables must span a whole segment")]
    MalformedSegment(String),
    #[error("template variable '{0}' is empty")]
    EmptyVariable(String),
    #[error("no value bound for template variable '{0}'")]
    UnboundVariable(String),
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, UriTemplateError> {
        let mut segments = Vec::new();
        for raw in template.split('/') {
            if raw.starts_with('{') && raw.ends_with('}') && raw.len() >= 2 {
                let name = &raw[1..raw.len() - 1];
                if name.is_empty() {
                    return Err(UriTemplateError::EmptyVariable(raw.to_string()));
                }
                if name.contains('{') || name.contains('}') {
                    return Err(UriTemplateError::MalformedSegment(raw.to_string()));
                }
                segments.push(Segment::Variable(name.to_string()));
            } else if raw.contains('{') || raw.contains('}') {
                return Err(UriTemplateError::MalformedSegment(raw.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }
        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn matches(&self, uri: &str) -> bool {
        self.match_variables(uri).is_some()
    }

    /// Matches `uri` against the template, returning the bound variables, or
    /// `None` when the URI does not fit. Variable segments must be non-empty.
    pub fn match_variables(&self, uri: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut variables = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Variable(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    variables.insert(name.clone(), part.to_string());
                }
            }
        }
        Some(variables)
    }

    /// Substitutes every variable from `variables`, failing on the first
    /// unbound one.
    pub fn expand(&self, variables: &HashMap<String, String>) -> Result<String, UriTemplateError> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => parts.push(literal.clone()),
                Segment::Variable(name) => match variables.get(name) {
                    Some(value) => parts.push(value.clone()),
                    None => return Err(UriTemplateError::UnboundVariable(name.clone())),
                },
            }
        }
        Ok(parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}

impl fmt::Display for UriTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}
