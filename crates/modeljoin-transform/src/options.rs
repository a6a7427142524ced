use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformOptions {
    /// Name format of the root's generated containment references; `{}` is
    /// replaced by the target class name.
    pub root_reference_format: String,
    /// Variable bound to the single source value when a source descriptor has
    /// exactly one `from`.
    pub self_alias: String,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            root_reference_format: "all{}s".to_string(),
            self_alias: "it".to_string(),
        }
    }
}

impl TransformOptions {
    pub fn root_reference_name(&self, class: &str) -> String {
        self.root_reference_format.replacen("{}", class, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_reference_name() {
        let options = TransformOptions::default();
        assert_eq!(options.root_reference_name("Restaurant"), "allRestaurants");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let options: TransformOptions =
            serde_json::from_str(r#"{ "self_alias": "self" }"#).unwrap();
        assert_eq!(options.self_alias, "self");
        assert_eq!(options.root_reference_format, "all{}s");
    }
}
