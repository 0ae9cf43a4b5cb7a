//! Template asset store.
//!
//! Templates are YAML documents whose string values may contain
//! `{identifier}` placeholders. They are parsed once when the store is
//! built, so a missing or broken asset stops the operator before it accepts
//! any event. Placeholders are substituted on the parsed tree, string leaf
//! by string leaf, never on the raw text.

use std::collections::BTreeMap;
use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use serde_json::Value;

use crate::domain::error::TemplateError;
use crate::domain::manifest::ChildKind;

const BUILTIN_DEPLOYMENT: &str = include_str!("../../../templates/deployment.yml");
const BUILTIN_PROMETHEUS_RULE: &str = include_str!("../../../templates/prometheus-rule.yml");
const BUILTIN_SCALED_OBJECT: &str = include_str!("../../../templates/scaledobject.yml");

/// Placeholder name to value.
pub type Placeholders = BTreeMap<&'static str, String>;

#[derive(Debug, Clone)]
struct Template {
    file: &'static str,
    document: Value,
}

/// Parsed templates, one per child kind.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: BTreeMap<ChildKind, Template>,
}

impl TemplateStore {
    /// Templates shipped with the operator.
    pub fn builtin() -> Result<Self, Report<TemplateError>> {
        Self::from_sources(|kind| {
            Ok(match kind {
                ChildKind::Workload => BUILTIN_DEPLOYMENT.to_string(),
                ChildKind::AlertRule => BUILTIN_PROMETHEUS_RULE.to_string(),
                ChildKind::AutoscalePolicy => BUILTIN_SCALED_OBJECT.to_string(),
            })
        })
    }

    /// Loads `deployment.yml`, `prometheus-rule.yml` and `scaledobject.yml`
    /// from `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, Report<TemplateError>> {
        Self::from_sources(|kind| {
            let path = dir.join(kind.template_file());
            std::fs::read_to_string(&path).change_context(TemplateError::Missing {
                file: kind.template_file().to_string(),
                message: format!("cannot read {}", path.display()),
            })
        })
    }

    fn from_sources<F>(mut load: F) -> Result<Self, Report<TemplateError>>
    where
        F: FnMut(ChildKind) -> Result<String, Report<TemplateError>>,
    {
        let mut templates = BTreeMap::new();
        for kind in ChildKind::ALL {
            let raw = load(kind)?;
            let file = kind.template_file();
            let document: Value = serde_yaml::from_str(&raw).map_err(|e| {
                Report::new(TemplateError::InvalidYaml {
                    file: file.to_string(),
                    message: e.to_string(),
                })
            })?;
            if !document.is_object() {
                return Err(Report::new(TemplateError::InvalidYaml {
                    file: file.to_string(),
                    message: "top level must be a mapping".to_string(),
                }));
            }
            templates.insert(kind, Template { file, document });
        }
        Ok(Self { templates })
    }

    /// Returns the template for `kind` with every placeholder replaced.
    pub fn instantiate(
        &self,
        kind: ChildKind,
        placeholders: &Placeholders,
    ) -> Result<Value, Report<TemplateError>> {
        let template = self.templates.get(&kind).ok_or_else(|| {
            Report::new(TemplateError::Missing {
                file: kind.template_file().to_string(),
                message: "not loaded".to_string(),
            })
        })?;
        let mut document = template.document.clone();
        substitute_value(&mut document, placeholders, template.file).map_err(Report::new)?;
        Ok(document)
    }
}

fn substitute_value(
    value: &mut Value,
    placeholders: &Placeholders,
    file: &str,
) -> Result<(), TemplateError> {
    match value {
        Value::String(text) => {
            if text.contains('{') {
                *text = substitute(text, placeholders, file)?;
            }
        }
        Value::Array(items) => {
            for item in items {
                substitute_value(item, placeholders, file)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                substitute_value(item, placeholders, file)?;
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
    Ok(())
}

/// Replaces `{identifier}` tokens. Braces that do not enclose an identifier
/// (PromQL label matchers, regex quantifiers) are kept as they are.
fn substitute(
    text: &str,
    placeholders: &Placeholders,
    file: &str,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let ident_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let is_placeholder = ident_len > 0
            && after.starts_with(|c: char| c.is_ascii_alphabetic())
            && after[ident_len..].starts_with('}');

        if is_placeholder {
            let name = &after[..ident_len];
            let replacement =
                placeholders
                    .get(name)
                    .ok_or_else(|| TemplateError::UnresolvedPlaceholder {
                        file: file.to_string(),
                        placeholder: name.to_string(),
                    })?;
            out.push_str(replacement);
            rest = &after[ident_len + 1..];
        } else {
            out.push('{');
            rest = after;
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;
    use tempfile::TempDir;

    use super::*;

    fn placeholders() -> Placeholders {
        Placeholders::from([
            ("poolName", "pool-a".to_string()),
            ("queueName", "ns1.render".to_string()),
        ])
    }

    #[test]
    fn substitutes_placeholders_and_keeps_promql_braces() {
        let out = substitute(
            r#"sum(rabbitmq_queue_messages_ready{queue="{queueName}"}) [1m] {2}"#,
            &placeholders(),
            "t.yml",
        )
        .unwrap();
        assert_eq!(
            out,
            r#"sum(rabbitmq_queue_messages_ready{queue="ns1.render"}) [1m] {2}"#
        );
    }

    #[test]
    fn unknown_placeholder_is_an_error() {
        let err = substitute("{poolName}-{unknown}", &placeholders(), "t.yml").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnresolvedPlaceholder {
                file: "t.yml".to_string(),
                placeholder: "unknown".to_string(),
            }
        );
    }

    #[test]
    fn builtin_templates_parse() {
        let store = TemplateStore::builtin().unwrap();
        assert_eq!(store.templates.len(), 3);
    }

    #[test]
    fn from_dir_reports_missing_file() {
        let dir = TempDir::new().expect("should create temp dir");
        let mut file = std::fs::File::create(dir.path().join("deployment.yml"))
            .expect("should create template");
        file.write_all(b"kind: Deployment\n").expect("should write template");

        let err = TemplateStore::from_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TemplateError::Missing { file, .. } if file == "prometheus-rule.yml"
        ));
    }

    #[test]
    fn from_dir_rejects_non_mapping_template() {
        let dir = TempDir::new().expect("should create temp dir");
        for kind in ChildKind::ALL {
            std::fs::write(dir.path().join(kind.template_file()), "- just\n- a list\n")
                .expect("should write template");
        }

        let err = TemplateStore::from_dir(dir.path()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            TemplateError::InvalidYaml { file, .. } if file == "deployment.yml"
        ));
    }

    #[test]
    fn instantiate_walks_nested_values() {
        let dir = TempDir::new().expect("should create temp dir");
        for kind in ChildKind::ALL {
            std::fs::write(
                dir.path().join(kind.template_file()),
                "metadata:\n  name: \"{poolName}\"\nspec:\n  items:\n    - \"q={queueName}\"\n    - 3\n",
            )
            .expect("should write template");
        }

        let store = TemplateStore::from_dir(dir.path()).unwrap();
        let doc = store
            .instantiate(ChildKind::AlertRule, &placeholders())
            .unwrap();
        assert_eq!(doc["metadata"]["name"], "pool-a");
        assert_eq!(doc["spec"]["items"][0], "q=ns1.render");
        assert_eq!(doc["spec"]["items"][1], 3);
    }
}
