//! `WWW-Authenticate` and `Authorization` header handling
//!
//! Clients parse 401/403 challenges with [`WwwAuthenticate`]; resource servers render
//! their combined challenge with [`WwwAuthenticateBuilder`]. Parameter values may be
//! quoted or bare, and one header may carry several challenges.

use http::HeaderMap;
use http::header::WWW_AUTHENTICATE;

use crate::types::{AuthProtocolMetadata, ProtocolPreferences};

/// One challenge: a scheme and its `name=value` parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Auth scheme as sent (e.g. `Bearer`)
    pub scheme: String,
    /// Parameters with lower-cased names, in order
    pub params: Vec<(String, String)>,
}

impl Challenge {
    /// Parameter value by (lower-case) name
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Case-insensitive scheme check
    pub fn is_scheme(&self, scheme: &str) -> bool {
        self.scheme.eq_ignore_ascii_case(scheme)
    }
}

/// Parse every challenge in a `WWW-Authenticate` value
pub fn parse_challenges(header: &str) -> Vec<Challenge> {
    let mut parser = Parser {
        chars: header.chars().collect(),
        pos: 0,
    };
    let mut challenges = Vec::new();
    let mut current: Option<Challenge> = None;

    loop {
        parser.skip(|c| c.is_whitespace() || c == ',');
        if parser.at_end() {
            break;
        }
        let token = parser.take_while(|c| !c.is_whitespace() && c != ',' && c != '=');
        if token.is_empty() {
            // stray '=' with no name
            parser.pos += 1;
            continue;
        }
        parser.skip(char::is_whitespace);

        if parser.peek() == Some('=') {
            parser.pos += 1;
            parser.skip(char::is_whitespace);
            let value = if parser.peek() == Some('"') {
                parser.quoted()
            } else {
                parser.take_while(|c| !c.is_whitespace() && c != ',')
            };
            if let Some(challenge) = current.as_mut() {
                challenge.params.push((token.to_ascii_lowercase(), value));
            }
        } else {
            if let Some(done) = current.take() {
                challenges.push(done);
            }
            current = Some(Challenge {
                scheme: token,
                params: Vec::new(),
            });
        }
    }

    if let Some(done) = current {
        challenges.push(done);
    }
    challenges
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        self.skip(pred);
        self.chars[start..self.pos].iter().collect()
    }

    fn quoted(&mut self) -> String {
        // opening quote
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '"' => break,
                '\\' => {
                    if let Some(escaped) = self.peek() {
                        out.push(escaped);
                        self.pos += 1;
                    }
                }
                other => out.push(other),
            }
        }
        out
    }
}

/// The parameters a client acts on, collected from a 401 or 403 response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WwwAuthenticate {
    /// Every parsed challenge
    pub challenges: Vec<Challenge>,
    /// RFC 9728 `resource_metadata` URL
    pub resource_metadata: Option<String>,
    /// Inline protocol hint from `auth_protocols`
    pub auth_protocols: Vec<String>,
    /// `default_protocol`
    pub default_protocol: Option<String>,
    /// `protocol_preferences`
    pub protocol_preferences: ProtocolPreferences,
    /// OAuth `error` code
    pub error: Option<String>,
    /// OAuth `error_description`
    pub error_description: Option<String>,
    /// Required `scope`
    pub scope: Option<String>,
}

impl WwwAuthenticate {
    /// Parse one header value
    pub fn parse(header: &str) -> Self {
        let challenges = parse_challenges(header);
        let find = |name: &str| {
            challenges
                .iter()
                .find_map(|c| c.param(name))
                .map(str::to_string)
        };

        Self {
            resource_metadata: find("resource_metadata"),
            auth_protocols: find("auth_protocols")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            default_protocol: find("default_protocol"),
            protocol_preferences: find("protocol_preferences")
                .map(|v| ProtocolPreferences::parse_challenge_value(&v))
                .unwrap_or_default(),
            error: find("error"),
            error_description: find("error_description"),
            scope: find("scope"),
            challenges,
        }
    }

    /// Parse every `WWW-Authenticate` header of a response; `None` if there are none
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let values: Vec<&str> = headers
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(Self::parse(&values.join(", ")))
    }

    /// Inline protocol hint as metadata entries, in challenge order
    pub fn protocol_hints(&self) -> Vec<AuthProtocolMetadata> {
        self.auth_protocols
            .iter()
            .map(|id| AuthProtocolMetadata::new(id.clone(), "1.0"))
            .collect()
    }

    /// Diagnostics for a 403 response
    pub fn scope_challenge(&self) -> ScopeChallenge {
        ScopeChallenge {
            error: self.error.clone(),
            scope: self.scope.clone(),
            error_description: self.error_description.clone(),
        }
    }
}

/// What a 403 said about missing scope; informational only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeChallenge {
    /// Typically `insufficient_scope`
    pub error: Option<String>,
    /// Scope the resource wants
    pub scope: Option<String>,
    /// Human-readable detail
    pub error_description: Option<String>,
}

/// Builds the combined 401 challenge a resource server sends
///
/// ```rust
/// use multiauth::challenge::WwwAuthenticateBuilder;
/// use multiauth::ProtocolPreferences;
///
/// let header = WwwAuthenticateBuilder::new()
///     .with_resource_metadata("https://api.example.com/.well-known/oauth-protected-resource/mcp")
///     .with_auth_protocols(["oauth2", "api_key"])
///     .with_default_protocol("oauth2")
///     .with_preferences(ProtocolPreferences::new().with("oauth2", 1).with("api_key", 2))
///     .build();
/// assert!(header.starts_with("Bearer "));
/// assert!(header.contains(r#"protocol_preferences="oauth2:1,api_key:2""#));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WwwAuthenticateBuilder {
    resource_metadata: Option<String>,
    auth_protocols: Vec<String>,
    default_protocol: Option<String>,
    preferences: ProtocolPreferences,
    error: Option<String>,
    error_description: Option<String>,
    scope: Option<String>,
    dpop_algs: Vec<String>,
}

impl WwwAuthenticateBuilder {
    /// Empty builder; renders a bare `Bearer` challenge
    pub fn new() -> Self {
        Self::default()
    }

    /// PRM URL
    pub fn with_resource_metadata(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata = Some(url.into());
        self
    }

    /// Advertised protocol ids
    pub fn with_auth_protocols<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_protocols = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Default protocol
    pub fn with_default_protocol(mut self, id: impl Into<String>) -> Self {
        self.default_protocol = Some(id.into());
        self
    }

    /// Protocol priorities
    pub fn with_preferences(mut self, preferences: ProtocolPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Error code and optional description
    pub fn with_error(mut self, error: impl Into<String>, description: Option<String>) -> Self {
        self.error = Some(error.into());
        self.error_description = description;
        self
    }

    /// Required scope
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Add a `DPoP algs="…"` challenge
    pub fn with_dpop_algs<I, S>(mut self, algs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dpop_algs = algs.into_iter().map(Into::into).collect();
        self
    }

    /// Render the header value
    pub fn build(&self) -> String {
        let mut params = Vec::new();
        let mut push = |name: &str, value: &str| {
            params.push(format!("{}=\"{}\"", name, escape(value)));
        };

        if let Some(error) = &self.error {
            push("error", error);
        }
        if let Some(description) = &self.error_description {
            push("error_description", description);
        }
        if let Some(url) = &self.resource_metadata {
            push("resource_metadata", url);
        }
        if !self.auth_protocols.is_empty() {
            push("auth_protocols", &self.auth_protocols.join(" "));
        }
        if let Some(default) = &self.default_protocol {
            push("default_protocol", default);
        }
        if !self.preferences.is_empty() {
            push("protocol_preferences", &self.preferences.to_challenge_value());
        }
        if let Some(scope) = &self.scope {
            push("scope", scope);
        }

        let mut header = if params.is_empty() {
            "Bearer".to_string()
        } else {
            format!("Bearer {}", params.join(", "))
        };
        if !self.dpop_algs.is_empty() {
            header.push_str(&format!(", DPoP algs=\"{}\"", escape(&self.dpop_algs.join(" "))));
        }
        header
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Split an `Authorization` value into scheme and credentials
pub fn split_authorization(value: &str) -> Option<(&str, &str)> {
    let (scheme, credentials) = value.trim().split_once(' ')?;
    let credentials = credentials.trim();
    if scheme.is_empty() || credentials.is_empty() {
        return None;
    }
    Some((scheme, credentials))
}
