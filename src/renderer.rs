//! Query template rendering
//!
//! Templates are SQL with two kinds of placeholder:
//! - `{{ ref('dataset') }}` becomes the table the data set is registered under,
//!   and the name is recorded so the executor knows what to load;
//! - `{{ name }}` is replaced by a run parameter (`datestamp` is always set).
//!
//! There is no control flow. Anything else inside `{{ }}` is an error.

use crate::error::{Result, ScoreError};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*(.*?)\s*\}\}").unwrap();
    static ref REF_CALL: Regex =
        Regex::new(r#"^ref\(\s*['"]([A-Za-z_][A-Za-z0-9_]*)['"]\s*\)$"#).unwrap();
    static ref PARAM_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedQuery {
    pub text: String,
    /// Data sets referenced, in order of first use.
    pub references: Vec<String>,
}

pub struct QueryRenderer {
    params: BTreeMap<String, String>,
}

impl QueryRenderer {
    pub fn new(params: BTreeMap<String, String>) -> Self {
        Self { params }
    }

    pub fn render(&self, template: &str) -> Result<RenderedQuery> {
        let mut text = String::with_capacity(template.len());
        let mut references: Vec<String> = Vec::new();
        let mut last = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let Some(whole) = caps.get(0) else { continue };
            let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            text.push_str(&template[last..whole.start()]);

            if let Some(r) = REF_CALL.captures(inner) {
                let dataset = r[1].to_string();
                text.push_str(&dataset);
                if !references.contains(&dataset) {
                    references.push(dataset);
                }
            } else if PARAM_NAME.is_match(inner) {
                let value = self.params.get(inner).ok_or_else(|| {
                    ScoreError::Render(format!("unknown template parameter '{}'", inner))
                })?;
                text.push_str(value);
            } else {
                return Err(ScoreError::Render(format!(
                    "unsupported template expression '{{{{ {} }}}}'",
                    inner
                )));
            }
            last = whole.end();
        }
        text.push_str(&template[last..]);

        Ok(RenderedQuery { text, references })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer() -> QueryRenderer {
        let mut params = BTreeMap::new();
        params.insert("datestamp".to_string(), "2024-12-01".to_string());
        QueryRenderer::new(params)
    }

    #[test]
    fn test_refs_are_substituted_and_recorded_once() {
        let rendered = renderer()
            .render(
                "SELECT h.hostname FROM {{ ref('crowdstrike_hosts') }} h \
                 JOIN {{ref(\"tenable_assets\")}} a ON a.name = h.hostname \
                 WHERE h.hostname IN (SELECT hostname FROM {{ ref('crowdstrike_hosts') }})",
            )
            .unwrap();
        assert_eq!(
            rendered.references,
            vec!["crowdstrike_hosts".to_string(), "tenable_assets".to_string()]
        );
        assert!(rendered.text.contains("FROM crowdstrike_hosts h"));
        assert!(!rendered.text.contains("{{"));
    }

    #[test]
    fn test_parameter_substitution() {
        let rendered = renderer()
            .render("SELECT '{{ datestamp }}' AS d FROM {{ ref('okta_users') }}")
            .unwrap();
        assert_eq!(rendered.text, "SELECT '2024-12-01' AS d FROM okta_users");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let sql = "SELECT 1 AS compliance";
        let rendered = renderer().render(sql).unwrap();
        assert_eq!(rendered.text, sql);
        assert!(rendered.references.is_empty());
    }

    #[test]
    fn test_unknown_parameter_and_expression_rejected() {
        assert!(matches!(
            renderer().render("SELECT {{ tenancy }}"),
            Err(ScoreError::Render(_))
        ));
        assert!(matches!(
            renderer().render("{% if x %}SELECT 1{% endif %} {{ x | upper }}"),
            Err(ScoreError::Render(_))
        ));
    }
}
