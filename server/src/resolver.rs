//! Placeholder resolution for sidebar templates.
//!
//! Templates contain `%token%` placeholders that are expanded per user. The
//! engine only depends on [`TemplateResolver`]; [`PlaceholderResolver`] is a
//! small registry-based implementation good enough for most hosts.

use shared::SessionUser;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("placeholder %{token}% failed: {reason}")]
    Provider { token: String, reason: String },
    #[error("template resolver unavailable")]
    Unavailable,
}

pub trait TemplateResolver: Send + Sync {
    fn resolve(&self, user: &SessionUser, text: &str) -> Result<String, ResolveError>;

    /// Probed once when the manager initializes.
    fn is_available(&self) -> bool {
        true
    }
}

pub type PlaceholderFn = Box<dyn Fn(&SessionUser) -> Result<String, ResolveError> + Send + Sync>;

/// Expands `%name%` tokens through registered providers.
///
/// Unknown tokens are left exactly as written.
#[derive(Default)]
pub struct PlaceholderResolver {
    providers: HashMap<String, PlaceholderFn>,
}

impl PlaceholderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, token: impl Into<String>, provider: F) -> &mut Self
    where
        F: Fn(&SessionUser) -> Result<String, ResolveError> + Send + Sync + 'static,
    {
        self.providers.insert(token.into(), Box::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl TemplateResolver for PlaceholderResolver {
    fn resolve(&self, user: &SessionUser, text: &str) -> Result<String, ResolveError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find('%') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];

            let Some(end) = after.find('%') else {
                out.push_str(&rest[start..]);
                return Ok(out);
            };

            let token = &after[..end];
            match self.providers.get(token) {
                Some(provider) if !token.is_empty() => {
                    out.push_str(&provider(user)?);
                    rest = &after[end + 1..];
                }
                _ => {
                    // Keep the opening `%`; the closing one may start the next token.
                    out.push('%');
                    out.push_str(token);
                    rest = &after[end..];
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> SessionUser {
        SessionUser::new("u1", "Steve", "world")
    }

    fn resolver() -> PlaceholderResolver {
        let mut resolver = PlaceholderResolver::new();
        resolver
            .register("player_name", |u| Ok(u.name.clone()))
            .register("world_name", |u| Ok(u.location.clone()));
        resolver
    }

    #[test]
    fn test_resolves_known_tokens() {
        let text = resolver()
            .resolve(&user(), "&7Hi %player_name% in %world_name%!")
            .unwrap();
        assert_eq!(text, "&7Hi Steve in world!");
    }

    #[test]
    fn test_unknown_tokens_survive() {
        let text = resolver()
            .resolve(&user(), "%unknown% and %player_name%")
            .unwrap();
        assert_eq!(text, "%unknown% and Steve");
    }

    #[test]
    fn test_percent_signs_outside_tokens() {
        let r = resolver();
        assert_eq!(r.resolve(&user(), "100%").unwrap(), "100%");
        assert_eq!(r.resolve(&user(), "%%").unwrap(), "%%");
        assert_eq!(
            r.resolve(&user(), "50% %player_name%").unwrap(),
            "50% Steve"
        );
    }

    #[test]
    fn test_provider_failure_propagates() {
        let mut r = PlaceholderResolver::new();
        r.register("broken", |_| {
            Err(ResolveError::Provider {
                token: "broken".to_string(),
                reason: "no economy".to_string(),
            })
        });

        assert!(r.resolve(&user(), "%broken%").is_err());
        assert_eq!(r.len(), 1);
    }
}
