use serde::{Deserialize, Serialize};

/// An immutable attribute triple. Equality and hashing cover all three
/// fields; target membership checks compare issuer and name only.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Attribute {
    pub issuer: String, // e.g. "https://attributes.example.org"
    pub name: String,   // e.g. "role"
    pub value: String,  // e.g. "administrator"
}

impl Attribute {
    pub fn new(issuer: &str, name: &str, value: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Whether `other` names the same attribute (issuer + name), regardless
    /// of value. Used when matching target subject criteria.
    pub fn same_criteria(&self, other: &Attribute) -> bool {
        self.issuer == other.issuer && self.name == other.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_attribute_equality_is_by_all_fields() {
        let a = Attribute::new("issuer", "role", "admin");
        let b = Attribute::new("issuer", "role", "admin");
        let c = Attribute::new("issuer", "role", "auditor");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_same_criteria_ignores_value() {
        let a = Attribute::new("issuer", "role", "admin");
        let c = Attribute::new("issuer", "role", "auditor");
        let d = Attribute::new("issuer", "site", "admin");
        assert!(a.same_criteria(&c));
        assert!(!a.same_criteria(&d));
    }

    #[test]
    fn test_attribute_serde_round_trip() {
        let a = Attribute::new("issuer", "role", "admin");
        let json = serde_json::to_string(&a).unwrap();
        let back: Attribute = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
    }
}
