use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub _type: String,
    pub value: String,
}

impl Identifier {
    pub(crate) fn dns(value: &str) -> Self {
        Self {
            _type: "dns".to_owned(),
            value: value.to_owned(),
        }
    }

    pub fn is_type_dns(&self) -> bool {
        self._type == "dns"
    }

    /// Identifier value with any wildcard label removed.
    pub fn hostname(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_strips_wildcard() {
        assert_eq!(Identifier::dns("*.example.com").hostname(), "example.com");
        assert_eq!(Identifier::dns("example.com").hostname(), "example.com");
        assert!(Identifier::dns("example.com").is_type_dns());
    }
}
