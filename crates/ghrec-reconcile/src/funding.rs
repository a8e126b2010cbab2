//! Funding declaration decoding, parsing and policy compliance.
//!
//! A declaration maps platform names to one target or a list of targets:
//!
//! ```yaml
//! github: OWASP
//! custom: ["https://owasp.org/donate/?reponame=www-project-nest"]
//! ```
//!
//! It is compliant when every non-empty target resolves to the umbrella
//! organization: `github` targets must equal its login, `custom` targets must
//! contain its web domain, and any other platform is rejected.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ghrec_core::FundingManifest;
use ghrec_remote::RemoteContent;
use serde_yaml::Value;

use crate::config::ReconcileConfig;
use crate::ReconcileError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingCompliance {
    Compliant,
    NonCompliant { platform: String, target: String },
}

impl FundingCompliance {
    pub fn is_compliant(&self) -> bool {
        matches!(self, Self::Compliant)
    }
}

/// Strips the transport encoding off a fetched file and returns its text.
pub fn decode_content(file: &RemoteContent) -> Result<String, ReconcileError> {
    match file.encoding.as_deref() {
        None | Some("base64") => {}
        Some(other) => {
            return Err(ReconcileError::MalformedFundingDeclaration(format!(
                "{} has unsupported encoding {other:?}",
                file.path
            )))
        }
    }

    let compact: String = file
        .content
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = BASE64.decode(compact.as_bytes()).map_err(|e| {
        ReconcileError::MalformedFundingDeclaration(format!("{}: invalid base64: {e}", file.path))
    })?;
    String::from_utf8(bytes).map_err(|e| {
        ReconcileError::MalformedFundingDeclaration(format!("{}: invalid utf-8: {e}", file.path))
    })
}

/// Parses declaration text into a platform mapping. Blank documents are empty mappings.
pub fn parse_manifest(text: &str) -> Result<FundingManifest, ReconcileError> {
    if text.trim().is_empty() {
        return Ok(FundingManifest::new());
    }
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| ReconcileError::MalformedFundingDeclaration(e.to_string()))?;
    match value {
        Value::Mapping(mapping) => {
            if let Some(key) = mapping.iter().find_map(|(k, v)| non_string_key(k, v)) {
                return Err(ReconcileError::MalformedFundingDeclaration(format!(
                    "mapping keys must be strings, found {}",
                    value_kind(key)
                )));
            }
            Ok(mapping)
        }
        Value::Null => Ok(FundingManifest::new()),
        other => Err(ReconcileError::MalformedFundingDeclaration(format!(
            "expected a mapping of platforms, found {}",
            value_kind(&other)
        ))),
    }
}

/// First key, at any depth, that cannot be stored as a JSON object key.
fn non_string_key<'v>(key: &'v Value, value: &'v Value) -> Option<&'v Value> {
    if !key.is_string() {
        return Some(key);
    }
    nested_non_string_key(value)
}

fn nested_non_string_key(value: &Value) -> Option<&Value> {
    match value {
        Value::Mapping(mapping) => mapping.iter().find_map(|(k, v)| non_string_key(k, v)),
        Value::Sequence(items) => items.iter().find_map(nested_non_string_key),
        Value::Tagged(tagged) => nested_non_string_key(&tagged.value),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingPolicy {
    organization_login: String,
    funding_domain: String,
}

impl FundingPolicy {
    pub fn new(organization_login: impl Into<String>, funding_domain: impl Into<String>) -> Self {
        Self {
            organization_login: organization_login.into().to_lowercase(),
            funding_domain: funding_domain.into().to_lowercase(),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(&config.organization_login, &config.funding_domain)
    }

    /// Walks (platform, target) pairs in document order and stops at the first rejection.
    pub fn evaluate(&self, manifest: &FundingManifest) -> FundingCompliance {
        manifest
            .iter()
            .flat_map(|(platform, targets)| {
                targets_of(targets)
                    .into_iter()
                    .filter(|target| is_truthy(target))
                    .map(move |target| (platform, target))
            })
            .find(|(platform, target)| !self.accepts(platform, target))
            .map_or(FundingCompliance::Compliant, |(platform, target)| {
                FundingCompliance::NonCompliant {
                    platform: describe(platform),
                    target: describe(target),
                }
            })
    }

    fn accepts(&self, platform: &Value, target: &Value) -> bool {
        let Some(target) = target.as_str() else {
            return false;
        };
        match platform.as_str() {
            Some("github") => target.to_lowercase() == self.organization_login,
            Some("custom") => target.to_lowercase().contains(&self.funding_domain),
            _ => false,
        }
    }
}

fn targets_of(targets: &Value) -> Vec<&Value> {
    match targets {
        Value::Sequence(items) => items.iter().collect(),
        single => vec![single],
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(items) => !items.is_empty(),
        Value::Mapping(mapping) => !mapping.is_empty(),
        Value::Tagged(tagged) => is_truthy(&tagged.value),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_else(|_| value_kind(other).to_string()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FundingPolicy {
        FundingPolicy::from_config(&ReconcileConfig::default())
    }

    fn evaluate(yaml: &str) -> FundingCompliance {
        policy().evaluate(&parse_manifest(yaml).expect("parse manifest"))
    }

    #[test]
    fn github_target_must_be_the_umbrella_organization() {
        assert!(evaluate("github: OWASP").is_compliant());
        assert!(evaluate("github: owasp").is_compliant());
        assert_eq!(
            evaluate("github: someoneelse"),
            FundingCompliance::NonCompliant {
                platform: "github".to_string(),
                target: "someoneelse".to_string()
            }
        );
    }

    #[test]
    fn custom_target_must_point_at_the_organization_domain() {
        assert!(evaluate("custom: https://owasp.org/donate").is_compliant());
        assert!(evaluate("custom: HTTPS://OWASP.ORG/donate?reponame=nest").is_compliant());
        assert!(!evaluate("custom: https://example.com").is_compliant());
        assert!(!evaluate("custom: https://notowasp.org.example.com").is_compliant());
    }

    #[test]
    fn unknown_platforms_are_rejected() {
        assert_eq!(
            evaluate("patreon: x"),
            FundingCompliance::NonCompliant {
                platform: "patreon".to_string(),
                target: "x".to_string()
            }
        );
    }

    #[test]
    fn empty_and_blank_declarations_are_compliant() {
        assert!(evaluate("{}").is_compliant());
        assert!(evaluate("   \n").is_compliant());
        assert!(evaluate("github: ''\npatreon: ~\nko_fi: []\n").is_compliant());
    }

    #[test]
    fn list_targets_are_checked_individually_and_stop_at_first_rejection() {
        let verdict = evaluate(
            "github: [OWASP, ~, someone, another]\ncustom: https://example.com\n",
        );
        assert_eq!(
            verdict,
            FundingCompliance::NonCompliant {
                platform: "github".to_string(),
                target: "someone".to_string()
            }
        );

        assert!(evaluate("github: [OWASP, owasp]\ncustom: [https://owasp.org/donate]").is_compliant());
    }

    #[test]
    fn platforms_are_evaluated_in_document_order() {
        let verdict = evaluate("patreon: first\ngithub: second\n");
        assert_eq!(
            verdict,
            FundingCompliance::NonCompliant {
                platform: "patreon".to_string(),
                target: "first".to_string()
            }
        );
    }

    #[test]
    fn non_string_targets_are_rejected() {
        assert!(!evaluate("github: 42").is_compliant());
        assert!(!evaluate("custom: [[nested]]").is_compliant());
    }

    #[test]
    fn policy_follows_configured_organization() {
        let acme = FundingPolicy::new("Acme", "acme.dev");
        let manifest = parse_manifest("github: ACME\ncustom: https://acme.dev/sponsor").unwrap();
        assert!(acme.evaluate(&manifest).is_compliant());
        assert!(!policy().evaluate(&manifest).is_compliant());
    }

    #[test]
    fn non_mapping_documents_are_malformed() {
        let err = parse_manifest("- github\n- custom\n").unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedFundingDeclaration(_)));
        assert!(parse_manifest("github: [unclosed").is_err());
    }

    #[test]
    fn non_string_keys_are_malformed() {
        for yaml in ["1: x\n", "[a]: x\n", "custom:\n  - 2: owasp\n"] {
            let err = parse_manifest(yaml).unwrap_err();
            assert!(
                matches!(err, ReconcileError::MalformedFundingDeclaration(_)),
                "{yaml}"
            );
        }

        let manifest = parse_manifest("github: OWASP\ncustom: [https://owasp.org]\n").unwrap();
        let json = serde_json::to_value(&manifest).unwrap();
        let back: FundingManifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn content_is_decoded_from_wrapped_base64() {
        let file = RemoteContent {
            path: ".github/FUNDING.yml".to_string(),
            encoding: Some("base64".to_string()),
            content: "Z2l0aHVi\nOiBPV0FT\nUAo=\n".to_string(),
        };
        assert_eq!(decode_content(&file).unwrap(), "github: OWASP\n");
    }

    #[test]
    fn undecodable_content_is_malformed() {
        let bad_base64 = RemoteContent {
            path: ".github/FUNDING.yml".to_string(),
            encoding: Some("base64".to_string()),
            content: "@@not base64@@".to_string(),
        };
        assert!(matches!(
            decode_content(&bad_base64),
            Err(ReconcileError::MalformedFundingDeclaration(_))
        ));

        let too_large = RemoteContent {
            path: ".github/FUNDING.yml".to_string(),
            encoding: Some("none".to_string()),
            content: String::new(),
        };
        assert!(decode_content(&too_large).is_err());
    }
}
