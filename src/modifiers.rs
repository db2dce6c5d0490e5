//! Translates the repeatable `--http-*` modifier flags (spec section 6)
//! into a [`sidecast_core::ModifierChain`], preserving declaration order
//! since the chain short-circuits on the first deny (spec section 4.2).

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use regex::Regex;
use sidecast_core::modifier::{FilterMode, Rule};
use sidecast_core::ModifierChain;

use crate::cli::Cli;

fn split_once_colon(s: &str, flag: &str) -> Result<(&str, &str)> {
    s.split_once(':')
        .with_context(|| format!("{flag} expects NAME:VALUE, got {s:?}"))
}

fn split_rewrite(s: &str, flag: &str) -> Result<(&str, &str)> {
    s.split_once("=>")
        .with_context(|| format!("{flag} expects PATTERN=>TEMPLATE, got {s:?}"))
}

/// Builds the ordered modifier chain shared by every output, from the
/// CLI's repeatable `--http-*` flags. Order follows declaration order
/// on the command line within each flag category, and categories are
/// applied in the order listed in spec section 4.2's table.
pub fn build_chain(cli: &Cli) -> Result<ModifierChain> {
    let mut rules = Vec::new();

    for pattern in &cli.http_allow_url {
        rules.push(Rule::AllowUrl(Regex::new(pattern).with_context(|| format!("invalid --http-allow-url regex {pattern:?}"))?));
    }
    for pattern in &cli.http_disallow_url {
        rules.push(Rule::DisallowUrl(
            Regex::new(pattern).with_context(|| format!("invalid --http-disallow-url regex {pattern:?}"))?,
        ));
    }
    for spec in &cli.http_rewrite_url {
        let (pattern, template) = split_rewrite(spec, "--http-rewrite-url")?;
        rules.push(Rule::RewriteUrl {
            pattern: Regex::new(pattern).with_context(|| format!("invalid --http-rewrite-url pattern {pattern:?}"))?,
            template: template.to_string(),
        });
    }
    for spec in &cli.http_allow_header {
        let (name, pattern) = split_once_colon(spec, "--http-allow-header")?;
        rules.push(Rule::AllowHeader {
            name: name.to_string(),
            pattern: Regex::new(pattern).with_context(|| format!("invalid --http-allow-header regex {pattern:?}"))?,
        });
    }
    for spec in &cli.http_disallow_header {
        let (name, pattern) = split_once_colon(spec, "--http-disallow-header")?;
        rules.push(Rule::DisallowHeader {
            name: name.to_string(),
            pattern: Regex::new(pattern).with_context(|| format!("invalid --http-disallow-header regex {pattern:?}"))?,
        });
    }
    for spec in &cli.http_rewrite_header {
        let (name, rest) = split_once_colon(spec, "--http-rewrite-header")?;
        let (pattern, template) = split_rewrite(rest, "--http-rewrite-header")?;
        rules.push(Rule::RewriteHeader {
            name: name.to_string(),
            pattern: Regex::new(pattern).with_context(|| format!("invalid --http-rewrite-header pattern {pattern:?}"))?,
            template: template.to_string(),
        });
    }
    for spec in &cli.http_set_header {
        let (name, value) = split_once_colon(spec, "--http-set-header")?;
        rules.push(Rule::SetHeader { name: name.to_string(), value: value.to_string() });
    }
    for spec in &cli.http_set_param {
        let (name, value) = split_once_colon(spec, "--http-set-param")?;
        rules.push(Rule::SetParam { name: name.to_string(), value: value.to_string() });
    }
    if let Some(methods) = &cli.http_allow_method {
        let set: HashSet<String> = methods.split(',').map(|m| m.trim().to_uppercase()).collect();
        rules.push(Rule::AllowMethod(set));
    }
    if let Some(spec) = &cli.http_basic_auth_filter {
        // A plain suffix check, not a colon split: decoded basic-auth
        // credentials are themselves `user:password`, so the regex side
        // legitimately contains colons (e.g. `^admin:`).
        let (pattern, mode) = match spec.strip_suffix(":allow") {
            Some(pattern) => (pattern, FilterMode::DropOnNonMatch),
            None => (spec.as_str(), FilterMode::DropOnMatch),
        };
        rules.push(Rule::BasicAuthFilter {
            pattern: Regex::new(pattern).with_context(|| format!("invalid --http-basic-auth-filter regex {pattern:?}"))?,
            mode,
        });
    }
    for spec in &cli.http_header_limiter {
        let (name, percent) = split_once_colon(spec, "--http-header-limiter")?;
        rules.push(Rule::HeaderLimiter { name: name.to_string(), percent: parse_percent(percent, "--http-header-limiter")? });
    }
    for spec in &cli.http_param_limiter {
        let (name, percent) = split_once_colon(spec, "--http-param-limiter")?;
        rules.push(Rule::ParamLimiter { name: name.to_string(), percent: parse_percent(percent, "--http-param-limiter")? });
    }

    Ok(ModifierChain::new(rules))
}

fn parse_percent(s: &str, flag: &str) -> Result<u8> {
    let n: u8 = s.parse().with_context(|| format!("{flag} percentage must be 0-100, got {s:?}"))?;
    if n > 100 {
        bail!("{flag} percentage must be 0-100, got {n}");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["sidecast"];
        full.extend_from_slice(args);
        Cli::parse_from(full)
    }

    #[test]
    fn builds_a_chain_that_applies_every_configured_rule() {
        let cli = parse(&[
            "--http-allow-url",
            "^/api/",
            "--http-rewrite-url",
            "^/api/v1/(.*)$=>/api/v2/$1",
            "--http-set-header",
            "X-Shadow:true",
            "--http-allow-method",
            "GET,POST",
        ]);
        let chain = build_chain(&cli).unwrap();

        let out = chain
            .apply(sidecast_core::Message::new_request(bytes::Bytes::from_static(
                b"GET /api/v1/users HTTP/1.1\r\n\r\n",
            )))
            .unwrap();
        assert_eq!(sidecast_core::http::path(&out.payload), Some(b"/api/v2/users".as_ref()));
        assert_eq!(sidecast_core::http::header(&out.payload, "X-Shadow"), Some(b"true".as_ref()));

        assert!(chain
            .apply(sidecast_core::Message::new_request(bytes::Bytes::from_static(
                b"DELETE /api/v1/users HTTP/1.1\r\n\r\n"
            )))
            .is_none());
    }

    #[test]
    fn basic_auth_filter_defaults_to_drop_on_match() {
        let cli = parse(&["--http-basic-auth-filter", "^admin:"]);
        let chain = build_chain(&cli).unwrap();
        assert!(format!("{chain:?}").contains("DropOnMatch"));
    }

    #[test]
    fn basic_auth_filter_allow_suffix_switches_mode() {
        let cli = parse(&["--http-basic-auth-filter", "^admin:allow"]);
        let chain = build_chain(&cli).unwrap();
        assert!(format!("{chain:?}").contains("DropOnNonMatch"));
    }

    #[test]
    fn rewrite_header_requires_name_and_arrow() {
        let cli = parse(&["--http-rewrite-header", "X-Foo:^a$=>b"]);
        assert!(build_chain(&cli).is_ok());

        let cli = parse(&["--http-rewrite-header", "missing-colon"]);
        assert!(build_chain(&cli).is_err());
    }

    #[test]
    fn header_limiter_rejects_out_of_range_percentage() {
        let cli = parse(&["--http-header-limiter", "X-User:150"]);
        assert!(build_chain(&cli).is_err());
    }
}
