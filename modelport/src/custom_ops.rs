//! Custom operator resolution. Pure with respect to its input string: parsing
//! a `--custom-ops` spec yields per-operator bindings and, when any token
//! omits a domain, the implicit fallback opset for this tool.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::error::{Error, Result};
use crate::exchange::ExchangeNode;

/// Domain stamped on custom operators declared without an explicit one.
pub const FALLBACK_CUSTOM_DOMAIN: &str = "org.modelport.custom";
pub const FALLBACK_CUSTOM_VERSION: i64 = 1;

/// A (domain, version) format extension. At most one version per domain is
/// meaningful in the active set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OpsetId {
    pub domain: String,
    pub version: i64,
}

impl OpsetId {
    pub fn new(domain: impl Into<String>, version: i64) -> OpsetId {
        OpsetId { domain: domain.into(), version }
    }
}

/// Transform applied to a dispatched node for a custom operator.
pub type CustomOpHandler = Arc<dyn Fn(&mut ExchangeNode) + Send + Sync>;

#[derive(Clone)]
pub struct OperatorBinding {
    pub domain: String,
    pub handler: CustomOpHandler,
}

impl fmt::Debug for OperatorBinding {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OperatorBinding").field("domain", &self.domain).finish()
    }
}

/// Resolver output: bindings keyed by operator name (later tokens overwrite
/// earlier ones) and the fallback opset, present iff at least one token had no
/// explicit domain.
#[derive(Clone, Debug, Default)]
pub struct CustomOps {
    pub bindings: HashMap<String, OperatorBinding>,
    pub inferred_opset: Option<OpsetId>,
}

/// The fallback opset is a per-invocation value, not a module constant, so it
/// can be overridden and tested.
#[derive(Clone, Debug)]
pub struct CustomOpParser {
    pub fallback: OpsetId,
}

impl Default for CustomOpParser {
    fn default() -> CustomOpParser {
        CustomOpParser { fallback: OpsetId::new(FALLBACK_CUSTOM_DOMAIN, FALLBACK_CUSTOM_VERSION) }
    }
}

impl CustomOpParser {
    /// Parses a comma-separated list of `OpName` or `OpName:domain` tokens.
    pub fn parse(&self, spec: &str) -> Result<CustomOps> {
        let mut bindings = HashMap::new();
        let mut uses_fallback = false;
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut parts = token.split(':');
            let (name, domain) = match (parts.next(), parts.next(), parts.next()) {
                (Some(name), None, _) => {
                    uses_fallback = true;
                    (name, self.fallback.domain.clone())
                }
                (Some(name), Some(domain), None) if !domain.is_empty() => {
                    (name, domain.to_string())
                }
                _ => return Err(Error::MalformedCustomOp(token.to_string())),
            };
            bindings.insert(
                name.to_string(),
                OperatorBinding { domain: domain.clone(), handler: stamp_domain(domain) },
            );
        }
        let inferred_opset = uses_fallback.then(|| self.fallback.clone());
        Ok(CustomOps { bindings, inferred_opset })
    }
}

/// Default handler: stamps the binding's domain on the node.
fn stamp_domain(domain: String) -> CustomOpHandler {
    Arc::new(move |node: &mut ExchangeNode| node.domain = domain.clone())
}

/// Parses an `--extra-opset` spec of the form `domain:version`.
pub fn parse_opset_spec(spec: &str) -> Result<OpsetId> {
    let tokens: Vec<&str> = spec.split(':').collect();
    if tokens.len() != 2 {
        return Err(Error::InvalidExtensionSpec(spec.to_string()));
    }
    let version =
        tokens[1].parse::<i64>().map_err(|_| Error::InvalidExtensionSpec(spec.to_string()))?;
    Ok(OpsetId::new(tokens[0], version))
}

/// Merges explicit user-supplied opsets with the inferred fallback one. The
/// set is keyed by domain: explicit entries win over the inferred one.
pub fn merge_opsets(explicit: &[OpsetId], inferred: Option<OpsetId>) -> Vec<OpsetId> {
    let mut merged: Vec<OpsetId> = vec![];
    for opset in explicit {
        if merged.iter().any(|o| o.domain == opset.domain) {
            debug!("ignoring duplicate opset for domain `{}'", opset.domain);
            continue;
        }
        merged.push(opset.clone());
    }
    if let Some(opset) = inferred {
        if merged.iter().any(|o| o.domain == opset.domain) {
            debug!("explicit opset for `{}' overrides the inferred fallback entry", opset.domain);
        } else {
            merged.push(opset);
        }
    }
    merged
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn explicit_and_fallback_domains() {
        let parsed = CustomOpParser::default().parse("Foo,Bar:com.acme").unwrap();
        assert_eq!(parsed.bindings["Foo"].domain, FALLBACK_CUSTOM_DOMAIN);
        assert_eq!(parsed.bindings["Bar"].domain, "com.acme");
        assert_eq!(parsed.inferred_opset, Some(OpsetId::new(FALLBACK_CUSTOM_DOMAIN, 1)));
    }

    #[test]
    fn no_fallback_token_means_no_inferred_opset() {
        let parsed = CustomOpParser::default().parse("Bar:com.acme").unwrap();
        assert_eq!(parsed.inferred_opset, None);
    }

    #[test]
    fn handler_stamps_the_domain() {
        let parsed = CustomOpParser::default().parse("Bar:com.acme").unwrap();
        let mut node = ExchangeNode::default();
        (parsed.bindings["Bar"].handler)(&mut node);
        assert_eq!(node.domain, "com.acme");
    }

    #[test]
    fn later_tokens_overwrite_earlier_ones() {
        let parsed = CustomOpParser::default().parse("Foo:com.a,Foo:com.b").unwrap();
        assert_eq!(parsed.bindings["Foo"].domain, "com.b");
    }

    #[test]
    fn overridden_fallback_is_used() {
        let parser = CustomOpParser { fallback: OpsetId::new("com.other", 3) };
        let parsed = parser.parse("Foo").unwrap();
        assert_eq!(parsed.bindings["Foo"].domain, "com.other");
        assert_eq!(parsed.inferred_opset, Some(OpsetId::new("com.other", 3)));
    }

    #[test]
    fn two_separators_is_malformed() {
        let err = CustomOpParser::default().parse("Baz:a:b").unwrap_err();
        assert!(matches!(err, Error::MalformedCustomOp(token) if token == "Baz:a:b"));
    }

    #[test]
    fn opset_spec_needs_domain_and_version() {
        assert!(matches!(parse_opset_spec("com.acme"), Err(Error::InvalidExtensionSpec(_))));
        assert!(matches!(parse_opset_spec("com.acme:x"), Err(Error::InvalidExtensionSpec(_))));
        assert!(matches!(parse_opset_spec("a:1:2"), Err(Error::InvalidExtensionSpec(_))));
        assert_eq!(parse_opset_spec("com.acme:4").unwrap(), OpsetId::new("com.acme", 4));
    }

    #[test]
    fn explicit_opset_wins_over_inferred() {
        let explicit = vec![OpsetId::new(FALLBACK_CUSTOM_DOMAIN, 7)];
        let merged = merge_opsets(&explicit, Some(OpsetId::new(FALLBACK_CUSTOM_DOMAIN, 1)));
        assert_eq!(merged, vec![OpsetId::new(FALLBACK_CUSTOM_DOMAIN, 7)]);
    }

    #[test]
    fn inferred_opset_is_kept_for_new_domains() {
        let explicit = vec![OpsetId::new("com.acme", 2)];
        let merged = merge_opsets(&explicit, Some(OpsetId::new(FALLBACK_CUSTOM_DOMAIN, 1)));
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].domain, FALLBACK_CUSTOM_DOMAIN);
    }
}
