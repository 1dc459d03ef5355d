//! Protocol allow-list and per-protocol validation rules.
//!
//! The policy gate is the sole access-control checkpoint in the pipeline: it
//! runs after canonicalization and before any I/O, performs no I/O itself,
//! and has no side effects. Inline `data:` locators bypass it entirely —
//! their payload is trusted by construction.

use crate::error::ImageError;
use crate::locator;
use std::collections::HashMap;
use std::fmt;

/// A validation rule evaluated against the full canonical locator.
///
/// Returning `Err(message)` rejects the locator; the first failing rule's
/// message becomes the rejection reason.
pub type ProtocolRule = Box<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;

/// Allow-list of protocols, each with an ordered list of rules.
///
/// Protocols are stored and compared lower-cased. The default allows `file`,
/// `http`, and `https` with no rules; use [`ProtocolPolicy::empty`] to start
/// from a deny-all baseline.
pub struct ProtocolPolicy {
  allowed: HashMap<String, Vec<ProtocolRule>>,
}

impl ProtocolPolicy {
  /// A policy that rejects every protocol.
  pub fn empty() -> Self {
    Self {
      allowed: HashMap::new(),
    }
  }

  /// Allow a protocol with no additional rules.
  pub fn allow(mut self, protocol: &str) -> Self {
    self
      .allowed
      .entry(protocol.to_ascii_lowercase())
      .or_default();
    self
  }

  /// Allow a protocol and append a validation rule for it.
  ///
  /// Rules for one protocol run in registration order.
  pub fn allow_with_rule(
    mut self,
    protocol: &str,
    rule: impl Fn(&str) -> std::result::Result<(), String> + Send + Sync + 'static,
  ) -> Self {
    self
      .allowed
      .entry(protocol.to_ascii_lowercase())
      .or_default()
      .push(Box::new(rule));
    self
  }

  /// Validate a canonical locator against the allow-list and its protocol's
  /// rules. Must be called before any fetch.
  pub fn validate(&self, canonical: &str) -> std::result::Result<(), ImageError> {
    if locator::is_inline(canonical) {
      return Ok(());
    }

    let protocol = locator::scheme_of(canonical).ok_or_else(|| ImageError::UnparsableUrl {
      url: canonical.to_string(),
    })?;

    let rules = self
      .allowed
      .get(&protocol)
      .ok_or_else(|| ImageError::ProtocolNotAllowed {
        url: canonical.to_string(),
      })?;

    for rule in rules {
      rule(canonical).map_err(|reason| ImageError::PolicyViolation {
        url: canonical.to_string(),
        reason,
      })?;
    }

    Ok(())
  }
}

impl Default for ProtocolPolicy {
  fn default() -> Self {
    Self::empty().allow("file").allow("http").allow("https")
  }
}

impl fmt::Debug for ProtocolPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut protocols: Vec<_> = self
      .allowed
      .iter()
      .map(|(p, rules)| format!("{} ({} rules)", p, rules.len()))
      .collect();
    protocols.sort();
    f.debug_struct("ProtocolPolicy")
      .field("allowed", &protocols)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn inline_locators_bypass_the_gate() {
    let policy = ProtocolPolicy::empty();
    assert!(policy.validate("data:image/png;base64,aGVsbG8=").is_ok());
  }

  #[test]
  fn missing_protocol_is_rejected() {
    let policy = ProtocolPolicy::empty().allow("file");
    let err = policy.validate("http://example.com/a.png").unwrap_err();
    assert!(matches!(err, ImageError::ProtocolNotAllowed { .. }));
    assert!(format!("{}", err).contains("protocol is not supported"));
  }

  #[test]
  fn protocol_comparison_is_case_insensitive() {
    let policy = ProtocolPolicy::empty().allow("HTTP");
    assert!(policy.validate("http://example.com/a.png").is_ok());
  }

  #[test]
  fn first_failing_rule_wins() {
    let policy = ProtocolPolicy::empty()
      .allow_with_rule("file", |_| Err("first rule".to_string()))
      .allow_with_rule("file", |_| Err("second rule".to_string()));
    let err = policy.validate("file:///tmp/a.png").unwrap_err();
    assert!(format!("{}", err).contains("first rule"));
  }

  #[test]
  fn rules_see_the_full_locator() {
    let policy = ProtocolPolicy::empty().allow_with_rule("file", |url| {
      if url.starts_with("file:///var/www/") {
        Ok(())
      } else {
        Err("file access outside the web root is denied".to_string())
      }
    });

    assert!(policy.validate("file:///var/www/a.png").is_ok());
    let err = policy.validate("file:///etc/passwd").unwrap_err();
    assert!(matches!(err, ImageError::PolicyViolation { .. }));
  }

  #[test]
  fn default_policy_allows_common_protocols() {
    let policy = ProtocolPolicy::default();
    assert!(policy.validate("file:///tmp/a.png").is_ok());
    assert!(policy.validate("http://example.com/a.png").is_ok());
    assert!(policy.validate("https://example.com/a.png").is_ok());
    assert!(policy.validate("ftp://example.com/a.png").is_err());
  }
}
