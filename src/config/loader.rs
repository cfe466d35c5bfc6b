use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::config::{DescriptorNode, RateLimit, RateLimitConfig, RateLimitUnit};
use crate::errors::{RateLimitError, Result};
use crate::metrics;

/// A named configuration blob handed to the loader by the runtime.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    domain: String,
    #[serde(default)]
    descriptors: Vec<RawDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    key: String,
    /// Absent value makes this the key's wildcard slot.
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    rate_limit: Option<RawRateLimit>,
    #[serde(default)]
    descriptors: Vec<RawDescriptor>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRateLimit {
    unit: String,
    requests_per_unit: i64,
    #[serde(default)]
    unlimited: bool,
    #[serde(default)]
    shadow_mode: bool,
}

/// Build a fresh, immutable configuration from a set of named blobs.
///
/// Pure over its inputs apart from publishing the per-domain limit gauge.
/// The result never references a previous configuration; replacement is
/// total. Any structural problem fails the whole load with an error naming
/// the offending file.
pub fn load(files: &[ConfigFile]) -> Result<RateLimitConfig> {
    let mut domains: HashMap<String, DescriptorNode> = HashMap::new();
    let mut limit_counts: Vec<(String, usize)> = Vec::new();

    for file in files {
        let raw: RawConfig = serde_yaml::from_str(&file.body)
            .map_err(|e| config_error(file, format!("malformed configuration: {}", e)))?;

        if raw.domain.is_empty() {
            return Err(config_error(file, "config file cannot have empty domain".to_string()));
        }
        if domains.contains_key(&raw.domain) {
            return Err(config_error(
                file,
                format!("duplicate domain '{}' in config", raw.domain),
            ));
        }

        let mut root = DescriptorNode::default();
        let mut limits = 0usize;
        build_descriptors(file, &raw.domain, &raw.descriptors, &mut root, &mut limits)?;

        debug!(domain = %raw.domain, limits, "loaded domain");
        limit_counts.push((raw.domain.clone(), limits));
        domains.insert(raw.domain, root);
    }

    metrics::set_config_descriptors(&limit_counts);
    Ok(RateLimitConfig { domains })
}

fn build_descriptors(
    file: &ConfigFile,
    prefix: &str,
    raw: &[RawDescriptor],
    parent: &mut DescriptorNode,
    limits: &mut usize,
) -> Result<()> {
    for descriptor in raw {
        if descriptor.key.is_empty() {
            return Err(config_error(
                file,
                format!("descriptor under '{}' has an empty key", prefix),
            ));
        }

        let value = descriptor.value.clone().unwrap_or_default();
        let full_key = if value.is_empty() {
            format!("{}.{}", prefix, descriptor.key)
        } else {
            format!("{}.{}_{}", prefix, descriptor.key, value)
        };

        let mut node = DescriptorNode::default();
        if let Some(raw_limit) = &descriptor.rate_limit {
            node.limit = Some(Arc::new(parse_limit(file, raw_limit, &full_key)?));
            *limits += 1;
        }

        build_descriptors(file, &full_key, &descriptor.descriptors, &mut node, limits)?;

        if node.limit.is_none() && node.children.is_empty() {
            return Err(config_error(
                file,
                format!(
                    "descriptor '{}' has neither a rate limit nor nested descriptors",
                    full_key
                ),
            ));
        }

        let slot = parent.children.entry(descriptor.key.clone()).or_default();
        if slot.insert(value, node).is_some() {
            return Err(config_error(
                file,
                format!("duplicate descriptor '{}'", full_key),
            ));
        }
    }
    Ok(())
}

fn parse_limit(file: &ConfigFile, raw: &RawRateLimit, full_key: &str) -> Result<RateLimit> {
    let unit = RateLimitUnit::parse(&raw.unit).ok_or_else(|| {
        config_error(
            file,
            format!("invalid rate limit unit '{}' for '{}'", raw.unit, full_key),
        )
    })?;
    if raw.requests_per_unit <= 0 || raw.requests_per_unit > u32::MAX as i64 {
        return Err(config_error(
            file,
            format!(
                "requests_per_unit must be a positive 32-bit integer for '{}' (got {})",
                full_key, raw.requests_per_unit
            ),
        ));
    }
    Ok(RateLimit {
        requests_per_unit: raw.requests_per_unit as u32,
        unit,
        unlimited: raw.unlimited,
        shadow_mode: raw.shadow_mode,
        full_key: full_key.to_string(),
    })
}

fn config_error(file: &ConfigFile, message: String) -> RateLimitError {
    RateLimitError::Config(format!("{}: {}", file.name, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generated::rate_limit_descriptor::Entry;

    fn file(name: &str, body: &str) -> ConfigFile {
        ConfigFile {
            name: name.to_string(),
            body: body.to_string(),
        }
    }

    fn entry(key: &str, value: &str) -> Entry {
        Entry {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    const BASIC: &str = "\
domain: mongo_cps
descriptors:
  - key: database
    value: users
    rate_limit:
      unit: second
      requests_per_unit: 500
  - key: database
    rate_limit:
      unit: second
      requests_per_unit: 100
";

    #[test]
    fn test_load_basic_config() {
        let config = load(&[file("config.basic.yaml", BASIC)]).unwrap();
        assert_eq!(config.domain_count(), 1);

        let users = config
            .get_limit("mongo_cps", &[entry("database", "users")])
            .unwrap();
        assert_eq!(users.requests_per_unit, 500);
        assert_eq!(users.unit, RateLimitUnit::Second);
        assert_eq!(users.full_key, "mongo_cps.database_users");

        let fallback = config
            .get_limit("mongo_cps", &[entry("database", "orders")])
            .unwrap();
        assert_eq!(fallback.requests_per_unit, 100);
        assert_eq!(fallback.full_key, "mongo_cps.database");
    }

    #[test]
    fn test_load_multiple_files() {
        let other = "domain: auth\ndescriptors:\n  - key: user\n    rate_limit:\n      unit: minute\n      requests_per_unit: 10\n";
        let config = load(&[file("a.yaml", BASIC), file("b.yaml", other)]).unwrap();
        assert_eq!(config.domain_count(), 2);
        assert!(config.get_limit("auth", &[entry("user", "alice")]).is_some());
    }

    #[test]
    fn test_empty_domain_rejected() {
        let err = load(&[file("bad.yaml", "domain: \"\"\ndescriptors: []\n")]).unwrap_err();
        assert!(err.to_string().contains("empty domain"), "{}", err);
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let err = load(&[file("a.yaml", BASIC), file("b.yaml", BASIC)]).unwrap_err();
        assert!(err.to_string().contains("duplicate domain"), "{}", err);
        assert!(err.to_string().contains("b.yaml"), "{}", err);
    }

    #[test]
    fn test_zero_requests_per_unit_rejected() {
        let body = "domain: d\ndescriptors:\n  - key: k\n    rate_limit:\n      unit: second\n      requests_per_unit: 0\n";
        let err = load(&[file("zero.yaml", body)]).unwrap_err();
        assert!(err.to_string().contains("requests_per_unit"), "{}", err);
    }

    #[test]
    fn test_unknown_unit_rejected() {
        let body = "domain: d\ndescriptors:\n  - key: k\n    rate_limit:\n      unit: fortnight\n      requests_per_unit: 5\n";
        let err = load(&[file("unit.yaml", body)]).unwrap_err();
        assert!(err.to_string().contains("invalid rate limit unit"), "{}", err);
    }

    #[test]
    fn test_dangling_descriptor_rejected() {
        let body = "domain: d\ndescriptors:\n  - key: k\n    value: v\n";
        let err = load(&[file("dangling.yaml", body)]).unwrap_err();
        assert!(
            err.to_string().contains("neither a rate limit nor nested"),
            "{}",
            err
        );
    }

    #[test]
    fn test_duplicate_descriptor_rejected() {
        let body = "\
domain: d
descriptors:
  - key: k
    value: v
    rate_limit:
      unit: second
      requests_per_unit: 1
  - key: k
    value: v
    rate_limit:
      unit: second
      requests_per_unit: 2
";
        let err = load(&[file("dup.yaml", body)]).unwrap_err();
        assert!(err.to_string().contains("duplicate descriptor"), "{}", err);
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        let err = load(&[file("broken.yaml", "domain: [unclosed\n")]).unwrap_err();
        assert!(err.to_string().contains("malformed configuration"), "{}", err);
        assert!(err.to_string().contains("broken.yaml"), "{}", err);
    }

    #[test]
    fn test_limit_flags_parsed() {
        let body = "\
domain: d
descriptors:
  - key: free
    rate_limit:
      unit: minute
      requests_per_unit: 1
      unlimited: true
  - key: trial
    rate_limit:
      unit: minute
      requests_per_unit: 2
      shadow_mode: true
";
        let config = load(&[file("flags.yaml", body)]).unwrap();
        assert!(config.get_limit("d", &[entry("free", "x")]).unwrap().unlimited);
        assert!(config.get_limit("d", &[entry("trial", "x")]).unwrap().shadow_mode);
    }

    #[test]
    fn test_load_is_idempotent() {
        let files = [file("a.yaml", BASIC)];
        let first = load(&files).unwrap();
        let second = load(&files).unwrap();
        assert_eq!(first.domain_count(), second.domain_count());
        let entries = [entry("database", "users")];
        let a = first.get_limit("mongo_cps", &entries).unwrap();
        let b = second.get_limit("mongo_cps", &entries).unwrap();
        assert_eq!(a.requests_per_unit, b.requests_per_unit);
        assert_eq!(a.unit, b.unit);
        assert_eq!(a.full_key, b.full_key);
    }

    #[test]
    fn test_empty_file_set_loads_empty_config() {
        let config = load(&[]).unwrap();
        assert_eq!(config.domain_count(), 0);
    }
}
