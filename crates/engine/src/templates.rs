//! Notification templates.
//!
//! Each template renders a title, body and optional action URL from
//! `{{variable}}` placeholders. Rendering fails with a template error when a
//! referenced variable is missing, so no half-filled text is ever stored.

use std::collections::HashMap;

use studybell_common::error::AppError;
use studybell_common::types::{ChannelPayload, NotificationType};

/// A named template bound to a notification type.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: &'static str,
    pub notification_type: NotificationType,
    pub title: &'static str,
    pub body: &'static str,
    pub action_url: Option<&'static str>,
    pub icon: Option<&'static str>,
}

/// Rendered text ready to be stored on an intent.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedNotification {
    pub title: String,
    pub body: String,
    pub payload: ChannelPayload,
}

const BUILTIN_TEMPLATES: &[Template] = &[
    Template {
        name: "streak_reminder",
        notification_type: NotificationType::StreakReminder,
        title: "Keep your {{streak_days}}-day streak alive",
        body: "You haven't studied today yet. One short session keeps your streak going.",
        action_url: Some("/study"),
        icon: Some("streak"),
    },
    Template {
        name: "study_reminder",
        notification_type: NotificationType::StudyReminder,
        title: "Time for today's session",
        body: "Your daily study goal is waiting. Pick up where you left off.",
        action_url: Some("/study"),
        icon: Some("book"),
    },
    Template {
        name: "motivational",
        notification_type: NotificationType::Motivational,
        title: "We miss you",
        body: "It has been {{days_inactive}} days since your last session. Even ten minutes today makes a difference.",
        action_url: Some("/study"),
        icon: Some("spark"),
    },
    Template {
        name: "coaching_note",
        notification_type: NotificationType::CoachingNote,
        title: "Your week in review",
        body: "This week you studied {{weekly_minutes}} minutes and completed {{weekly_tests}} tests. {{tip}}",
        action_url: Some("/progress"),
        icon: Some("coach"),
    },
    Template {
        name: "achievement_unlock",
        notification_type: NotificationType::AchievementUnlock,
        title: "Achievement unlocked: {{achievement_name}}",
        body: "{{achievement_description}}",
        action_url: Some("/achievements/{{achievement_id}}"),
        icon: Some("trophy"),
    },
    Template {
        name: "duel_challenge",
        notification_type: NotificationType::DuelChallenge,
        title: "{{opponent}} challenged you to a duel",
        body: "Accept the challenge on {{topic}} before it expires.",
        action_url: Some("/duels/{{duel_id}}"),
        icon: Some("duel"),
    },
    Template {
        name: "system_announcement",
        notification_type: NotificationType::SystemAnnouncement,
        title: "{{title}}",
        body: "{{body}}",
        action_url: None,
        icon: Some("megaphone"),
    },
];

/// Lookup table of the built-in templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: HashMap<&'static str, Template>,
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        Self {
            templates: BUILTIN_TEMPLATES
                .iter()
                .map(|t| (t.name, t.clone()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    /// Render `name` for `notification_type` with `variables`.
    pub fn render(
        &self,
        name: &str,
        notification_type: NotificationType,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedNotification, AppError> {
        let template = self
            .get(name)
            .ok_or_else(|| AppError::Template(format!("Unknown template '{}'", name)))?;

        if template.notification_type != notification_type {
            return Err(AppError::Template(format!(
                "Template '{}' is for {} notifications, not {}",
                name, template.notification_type, notification_type
            )));
        }

        let title = fill(template.title, variables)?;
        let body = fill(template.body, variables)?;
        let action_url = template
            .action_url
            .map(|url| fill(url, variables))
            .transpose()?;

        Ok(RenderedNotification {
            title,
            body,
            payload: ChannelPayload {
                action_url,
                icon: template.icon.map(str::to_string),
            },
        })
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Substitute every `{{name}}` in `text`. An unterminated `{{` is kept literally.
pub fn fill(text: &str, variables: &HashMap<String, String>) -> Result<String, AppError> {
    let mut out = String::with_capacity(text.len());
    let mut missing = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            rest = "";
            break;
        };

        let key = after_open[..close].trim();
        match variables.get(key) {
            Some(value) => out.push_str(value),
            None => missing.push(key.to_string()),
        }
        rest = &after_open[close + 2..];
    }
    out.push_str(rest);

    if !missing.is_empty() {
        return Err(AppError::Template(format!(
            "Missing template variable(s): {}",
            missing.join(", ")
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_fill_substitutes_and_trims_keys() {
        let variables = vars(&[("name", "Ada"), ("day", "3")]);
        let out = fill("Hi {{ name }}, day {{day}}", &variables).unwrap();
        assert_eq!(out, "Hi Ada, day 3");
    }

    #[test]
    fn test_fill_reports_every_missing_variable() {
        let err = fill("{{a}} {{b}} {{c}}", &vars(&[("b", "x")])).unwrap_err();
        match err {
            AppError::Template(msg) => {
                assert!(msg.contains('a'));
                assert!(msg.contains('c'));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_fill_keeps_unterminated_braces() {
        assert_eq!(fill("50% {{off", &HashMap::new()).unwrap(), "50% {{off");
    }

    #[test]
    fn test_render_achievement_template() {
        let catalog = TemplateCatalog::builtin();
        let rendered = catalog
            .render(
                "achievement_unlock",
                NotificationType::AchievementUnlock,
                &vars(&[
                    ("achievement_name", "Week Warrior"),
                    ("achievement_description", "Seven days in a row"),
                    ("achievement_id", "abc"),
                ]),
            )
            .unwrap();
        assert_eq!(rendered.title, "Achievement unlocked: Week Warrior");
        assert_eq!(rendered.payload.action_url.as_deref(), Some("/achievements/abc"));
        assert_eq!(rendered.payload.icon.as_deref(), Some("trophy"));
    }

    #[test]
    fn test_render_rejects_type_mismatch_and_unknown_names() {
        let catalog = TemplateCatalog::builtin();
        assert!(matches!(
            catalog.render("study_reminder", NotificationType::Motivational, &HashMap::new()),
            Err(AppError::Template(_))
        ));
        assert!(matches!(
            catalog.render("nope", NotificationType::Motivational, &HashMap::new()),
            Err(AppError::Template(_))
        ));
    }

    #[test]
    fn test_every_type_has_a_template() {
        let catalog = TemplateCatalog::builtin();
        for ty in NotificationType::ALL {
            assert!(
                catalog.get(ty.as_str()).is_some(),
                "missing template for {}",
                ty
            );
        }
    }
}
