use serde::{Deserialize, Serialize};

/// A tenant-isolation boundary. All policy sets, attributes, and cache keys
/// are scoped to one zone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZoneContext {
    pub id: String,
    pub name: String,
    /// External subject-attribute connector, if one is configured for the
    /// zone. Its presence switches cached decisions to elapsed-time
    /// staleness.
    pub subject_connector: Option<AttributeConnector>,
    pub resource_connector: Option<AttributeConnector>,
}

impl ZoneContext {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            subject_connector: None,
            resource_connector: None,
        }
    }

    pub fn has_connectors(&self) -> bool {
        self.subject_connector.is_some() || self.resource_connector.is_some()
    }
}

/// Configuration of an external attribute adapter as far as the decision
/// cache cares: how long its attributes may be assumed fresh.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttributeConnector {
    pub max_cached_interval_minutes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_without_connectors() {
        let zone = ZoneContext::new("zone-1", "acceptance");
        assert!(!zone.has_connectors());
    }

    #[test]
    fn test_zone_with_resource_connector() {
        let mut zone = ZoneContext::new("zone-1", "acceptance");
        zone.resource_connector = Some(AttributeConnector {
            max_cached_interval_minutes: 30,
        });
        assert!(zone.has_connectors());
    }
}
