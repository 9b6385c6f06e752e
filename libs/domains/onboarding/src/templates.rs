//! Welcome email rendering.
//!
//! Handlebars templates built from [`WelcomeTemplateConfig`]. The body
//! always carries the welcome paragraph and adds the confirmation paragraph
//! for unconfirmed users.

use crate::config::WelcomeTemplateConfig;
use crate::error::TemplateError;
use crate::models::UserRecord;
use handlebars::Handlebars;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const SUBJECT: &str = "subject";
const BODY: &str = "body";

#[derive(Serialize)]
struct WelcomeData<'a> {
    name: &'a str,
    confirmed: bool,
    confirmation_url: &'a str,
}

/// Rendered subject and HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedWelcome {
    pub subject: String,
    pub html: String,
}

/// Compiled welcome templates. Cheap to clone.
#[derive(Clone)]
pub struct WelcomeTemplate {
    // Subject is plain text, so it gets no HTML escaping
    subject: Arc<Handlebars<'static>>,
    html: Arc<Handlebars<'static>>,
    confirmation_url: String,
}

impl WelcomeTemplate {
    pub fn new(config: &WelcomeTemplateConfig) -> Result<Self, TemplateError> {
        let mut subject = Handlebars::new();
        subject.register_escape_fn(handlebars::no_escape);
        subject.register_template_string(SUBJECT, &config.subject)?;

        let mut html = Handlebars::new();
        let body = format!(
            "{}{{{{#unless confirmed}}}}{}{{{{/unless}}}}",
            config.welcome_html, config.confirmation_html
        );
        html.register_template_string(BODY, body)?;

        Ok(Self {
            subject: Arc::new(subject),
            html: Arc::new(html),
            confirmation_url: config.confirmation_url.clone(),
        })
    }

    pub fn render(&self, user: &UserRecord) -> Result<RenderedWelcome, TemplateError> {
        debug!(user_id = %user.id, confirmed = user.confirmed, "Rendering welcome email");

        let data = WelcomeData {
            name: &user.name,
            confirmed: user.confirmed,
            confirmation_url: &self.confirmation_url,
        };

        Ok(RenderedWelcome {
            subject: self.subject.render(SUBJECT, &data)?,
            html: self.html.render(BODY, &data)?,
        })
    }
}

impl std::fmt::Debug for WelcomeTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WelcomeTemplate")
            .field("confirmation_url", &self.confirmation_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> WelcomeTemplate {
        WelcomeTemplate::new(&WelcomeTemplateConfig::default()).unwrap()
    }

    #[test]
    fn test_subject() {
        let user = UserRecord::new("u-1", "Ana", "ana@example.com");
        assert_eq!(template().render(&user).unwrap().subject, "Bienvenido, Ana!");
    }

    #[test]
    fn test_confirmed_user_gets_no_confirmation_link() {
        let user = UserRecord::new("u-1", "Ana", "ana@example.com").confirmed(true);
        let rendered = template().render(&user).unwrap();

        assert_eq!(rendered.html, "<p>Bienvenido a nuestro newsletter, <b>Ana</b>!</p>");
    }

    #[test]
    fn test_unconfirmed_user_gets_confirmation_link() {
        let user = UserRecord::new("u-1", "Ana", "ana@example.com");
        let rendered = template().render(&user).unwrap();

        assert!(rendered.html.starts_with("<p>Bienvenido a nuestro newsletter, <b>Ana</b>!</p>"));
        assert!(rendered.html.contains("http://fake.newsletter.com"));
        assert!(rendered.html.contains("confirmá tu email"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let user = UserRecord::new("u-1", "Ana", "ana@example.com");
        let template = template();
        assert_eq!(template.render(&user).unwrap(), template.render(&user).unwrap());
    }

    #[test]
    fn test_name_is_escaped_in_html_only() {
        let user = UserRecord::new("u-1", "<Ana & Bo>", "ana@example.com").confirmed(true);
        let rendered = template().render(&user).unwrap();

        assert_eq!(rendered.subject, "Bienvenido, <Ana & Bo>!");
        assert!(rendered.html.contains("<b>&lt;Ana &amp; Bo&gt;</b>"));
    }

    #[test]
    fn test_custom_confirmation_url_is_not_escaped() {
        let config = WelcomeTemplateConfig {
            confirmation_url: "https://news.example.com/c?a=1&b=2".to_string(),
            ..WelcomeTemplateConfig::default()
        };
        let user = UserRecord::new("u-1", "Ana", "ana@example.com");
        let rendered = WelcomeTemplate::new(&config).unwrap().render(&user).unwrap();

        assert!(rendered.html.contains("https://news.example.com/c?a=1&b=2"));
    }

    #[test]
    fn test_invalid_template_is_rejected() {
        let config = WelcomeTemplateConfig {
            subject: "{{#if}}".to_string(),
            ..WelcomeTemplateConfig::default()
        };
        assert!(WelcomeTemplate::new(&config).is_err());
    }
}
