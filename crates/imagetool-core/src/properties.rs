//! Parsing of caller-supplied `key=value` image properties.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Parses a single `key=value` pair, trimming whitespace around both parts.
///
/// # Errors
///
/// Returns [`Error::MalformedKeyValue`] unless the input contains exactly
/// one `=` and a non-empty key.
pub fn parse_key_value(input: &str) -> Result<(String, String)> {
    let mut parts = input.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(Error::MalformedKeyValue {
            input: input.to_string(),
        }),
    }
}

/// Parses a list of `key=value` items, each of which may itself be a
/// comma-separated list.
///
/// # Errors
///
/// Returns [`Error::MalformedKeyValue`] for the first malformed item.
///
/// # Examples
///
/// ```
/// use imagetool_core::properties::parse_properties;
///
/// let props = parse_properties(["os_distro=centos,os_version=7", "hw_qemu_guest_agent=yes"]).unwrap();
/// assert_eq!(props.len(), 3);
/// assert_eq!(props["os_version"], "7");
/// ```
pub fn parse_properties<I, S>(items: I) -> Result<BTreeMap<String, String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut properties = BTreeMap::new();
    for item in items {
        for pair in item.as_ref().split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = parse_key_value(pair)?;
            properties.insert(key, value);
        }
    }
    Ok(properties)
}
