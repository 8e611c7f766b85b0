//! Actions rendered under delivered messages

use tarwatch_common::channel::{Action, Target};
use tarwatch_common::config::DispatcherConfig;
use tarwatch_common::domain::DocumentLink;

/// Builds deep links and keyboard actions for document notifications
#[derive(Debug, Clone)]
pub struct Keyboard {
    deeplink_template: String,
    details_label: String,
    docs_label: String,
}

impl Keyboard {
    pub fn new(
        deeplink_template: impl Into<String>,
        details_label: impl Into<String>,
        docs_label: impl Into<String>,
    ) -> Self {
        Self {
            deeplink_template: deeplink_template.into(),
            details_label: details_label.into(),
            docs_label: docs_label.into(),
        }
    }

    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self::new(
            config.deeplink_template.clone(),
            config.details_label.clone(),
            config.docs_label.clone(),
        )
    }

    /// Deep link opening the bot on `payload`
    pub fn deep_link(&self, payload: &str) -> String {
        self.deeplink_template.replace("{}", payload)
    }

    /// Recipients get an in-chat details callback, aliases get deep links
    pub fn actions(&self, target: &Target, link: &DocumentLink) -> Vec<Action> {
        match target {
            Target::Chat(_) => vec![Action::Callback {
                label: self.details_label.clone(),
                data: format!("a.info:{}", link.public_id),
            }],
            Target::Alias(_) => {
                let mut actions = vec![Action::Url {
                    label: self.details_label.clone(),
                    url: self.deep_link(&link.public_id),
                }];
                if link.attachments > 1 {
                    actions.push(Action::Url {
                        label: self.docs_label.clone(),
                        url: self.deep_link(&format!("docs-{}", link.public_id)),
                    });
                }
                actions
            }
        }
    }
}
