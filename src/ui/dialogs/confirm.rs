use adw::prelude::*;

/// Destructive or session-ending actions that need a second click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmAction {
    DeleteChat(String),
    ClearAll,
    SignOut,
}

impl ConfirmAction {
    pub fn heading(&self) -> &'static str {
        match self {
            Self::DeleteChat(_) => "Delete Chat?",
            Self::ClearAll => "Clear All Chats?",
            Self::SignOut => "Sign Out?",
        }
    }

    pub fn body(&self) -> &'static str {
        match self {
            Self::DeleteChat(_) => {
                "This will permanently delete this conversation. This action cannot be undone."
            }
            Self::ClearAll => {
                "This will permanently delete ALL your conversations. This action cannot be undone."
            }
            Self::SignOut => "Are you sure you want to sign out of your session?",
        }
    }

    pub fn confirm_label(&self) -> &'static str {
        match self {
            Self::DeleteChat(_) => "Delete Forever",
            Self::ClearAll => "Clear Everything",
            Self::SignOut => "Sign Out",
        }
    }

    pub fn is_destructive(&self) -> bool {
        !matches!(self, Self::SignOut)
    }
}

/// Present a confirmation dialog over `parent`; `on_confirm` runs only when
/// the user accepts. Cancel and Escape leave everything untouched.
pub fn present<F>(parent: &impl IsA<gtk::Widget>, action: ConfirmAction, on_confirm: F)
where
    F: Fn(ConfirmAction) + 'static,
{
    let dialog = adw::AlertDialog::builder()
        .heading(action.heading())
        .body(action.body())
        .build();

    dialog.add_response("cancel", "Cancel");
    dialog.add_response("confirm", action.confirm_label());
    dialog.set_response_appearance(
        "confirm",
        if action.is_destructive() {
            adw::ResponseAppearance::Destructive
        } else {
            adw::ResponseAppearance::Suggested
        },
    );
    dialog.set_default_response(Some("cancel"));
    dialog.set_close_response("cancel");

    dialog.connect_response(None, move |_dialog, response| {
        if response == "confirm" {
            on_confirm(action.clone());
        }
    });

    dialog.present(Some(parent));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_match_action() {
        let delete = ConfirmAction::DeleteChat("1".into());
        assert_eq!(delete.heading(), "Delete Chat?");
        assert_eq!(delete.confirm_label(), "Delete Forever");
        assert_eq!(ConfirmAction::ClearAll.confirm_label(), "Clear Everything");
        assert_eq!(ConfirmAction::SignOut.heading(), "Sign Out?");
    }

    #[test]
    fn test_only_sign_out_is_non_destructive() {
        assert!(ConfirmAction::DeleteChat("1".into()).is_destructive());
        assert!(ConfirmAction::ClearAll.is_destructive());
        assert!(!ConfirmAction::SignOut.is_destructive());
    }
}
