//! URL match patterns and the domain heuristic used to find reusable contexts.
//!
//! Patterns follow the WebExtension match-pattern shape
//! `<scheme>://<host><path>`, e.g. `*://*.example.com/*`, plus the special
//! pattern [`ALL_URLS`]. The path part is compiled to a [`glob::Pattern`]
//! where only `*` is a wildcard.

use url::Url;

/// Matches every URL.
pub const ALL_URLS: &str = "<all_urls>";

/// Schemes accepted by a `*` scheme.
const WILDCARD_SCHEMES: &[&str] = &["http", "https", "ws", "wss"];

/// Compiled match pattern.
///
/// Compiles once; strings that are not valid match patterns fall back to
/// exact comparison with the URL.
#[derive(Debug, Clone)]
pub struct MatchPattern {
	source: String,
	kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
	All,
	Parts {
		scheme: Option<String>,
		host: HostPattern,
		path: glob::Pattern,
	},
	Literal,
}

#[derive(Debug, Clone)]
enum HostPattern {
	Any,
	/// `*.example.com`: the domain itself or any subdomain.
	Subdomains(String),
	Exact(String),
}

impl HostPattern {
	fn matches(&self, host: &str) -> bool {
		let host = host.to_ascii_lowercase();
		match self {
			HostPattern::Any => true,
			HostPattern::Subdomains(domain) => {
				host == *domain || host.strip_suffix(domain.as_str()).is_some_and(|rest| rest.ends_with('.'))
			}
			HostPattern::Exact(expected) => host == *expected,
		}
	}
}

impl MatchPattern {
	pub fn new(pattern: &str) -> Self {
		let kind = if pattern == ALL_URLS {
			PatternKind::All
		} else {
			parse_parts(pattern).unwrap_or(PatternKind::Literal)
		};
		Self {
			source: pattern.to_string(),
			kind,
		}
	}

	/// Returns `true` if the URL matches this pattern.
	pub fn is_match(&self, url: &str) -> bool {
		match &self.kind {
			PatternKind::All => true,
			PatternKind::Literal => url == self.source,
			PatternKind::Parts { scheme, host, path } => {
				let Ok(parsed) = Url::parse(url) else {
					return false;
				};
				let scheme_ok = match scheme {
					Some(expected) => parsed.scheme() == expected,
					None => WILDCARD_SCHEMES.contains(&parsed.scheme()),
				};
				let host_ok = parsed.host_str().is_some_and(|h| host.matches(h));
				let mut target = parsed.path().to_string();
				if let Some(query) = parsed.query() {
					target.push('?');
					target.push_str(query);
				}
				scheme_ok && host_ok && path.matches(&target)
			}
		}
	}

	pub fn as_str(&self) -> &str {
		&self.source
	}
}

fn parse_parts(pattern: &str) -> Option<PatternKind> {
	let (scheme, rest) = pattern.split_once("://")?;
	let (host, path) = match rest.find('/') {
		Some(index) => rest.split_at(index),
		None => return None,
	};

	let scheme = match scheme {
		"*" => None,
		s if !s.is_empty() => Some(s.to_ascii_lowercase()),
		_ => return None,
	};
	let host = match host {
		"*" => HostPattern::Any,
		h if h.starts_with("*.") && h.len() > 2 => HostPattern::Subdomains(h[2..].to_ascii_lowercase()),
		h if !h.is_empty() && !h.contains('*') => HostPattern::Exact(h.to_ascii_lowercase()),
		_ => return None,
	};
	let glob_source = path
		.split('*')
		.map(glob::Pattern::escape)
		.collect::<Vec<_>>()
		.join("*");
	let path = glob::Pattern::new(&glob_source).ok()?;

	Some(PatternKind::Parts { scheme, host, path })
}

/// Last two dot-separated labels of the host named by `target`.
///
/// `target` may be a full URL or a bare hostname. The split is purely
/// syntactic, so multi-label public suffixes are mis-identified
/// (`news.bbc.co.uk` yields `co.uk`).
pub fn domain_of(target: &str) -> Option<String> {
	let host = match Url::parse(target) {
		Ok(url) if url.host_str().is_some() => url.host_str().map(str::to_string),
		_ => bare_host(target),
	}?;

	let labels: Vec<&str> = host.split('.').filter(|label| !label.is_empty()).collect();
	if labels.is_empty() {
		return None;
	}
	let start = labels.len().saturating_sub(2);
	Some(labels[start..].join(".").to_ascii_lowercase())
}

fn bare_host(target: &str) -> Option<String> {
	let target = target.trim();
	let end = target.find(['/', ':', '?', '#']).unwrap_or(target.len());
	let host = &target[..end];
	(!host.is_empty()).then(|| host.to_string())
}

/// Match pattern covering `domain` and every subdomain.
pub fn domain_pattern(domain: &str) -> String {
	format!("*://*.{domain}/*")
}
