//! Turns a dispatch outcome into the text and keyboard sent back

use crate::dispatcher::Outcome;

const WELCOME: &str = "🔥 Welcome to your personal Todo List Bot! 🔥\n\n\
📝 Send me any text and I'll add it to your todo list\n\
✅ Use /done to mark items as completed\n\
📋 Use /list to see all your items\n\n\
Let's get productive! 💪";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    /// Items offered as a one-tap keyboard.
    pub selection: Option<Vec<String>>,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            selection: None,
        }
    }

    fn with_selection(text: impl Into<String>, items: &[String]) -> Self {
        Self {
            text: text.into(),
            selection: Some(items.to_vec()),
        }
    }
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("• {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render(outcome: &Outcome) -> Reply {
    match outcome {
        Outcome::Welcome => Reply::text(WELCOME),
        Outcome::ListReply(items) => {
            Reply::text(format!("📋 Your Todo List:\n\n{}", bullets(items)))
        }
        Outcome::EmptyListNotice => {
            Reply::text("📭 Your todo list is empty! Send me some tasks to add.")
        }
        Outcome::SelectionPrompt(items) => {
            Reply::with_selection("Select an item to delete:", items)
        }
        Outcome::ItemCompleted(remaining) => Reply::with_selection(
            "✅ Item completed! Select another item to delete:",
            remaining,
        ),
        Outcome::AllDone => Reply::text("🎉 Great job! All items completed!"),
        Outcome::UnknownCommand => Reply::text("❓ Unknown command. Use /start for help."),
        Outcome::ItemAdded(items) => Reply::text(format!(
            "✅ Added to your todo list!\n\n📋 Current items:\n{}",
            bullets(items)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::{render, Reply};
    use crate::dispatcher::Outcome;

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn list_reply_renders_bullets_in_order() {
        let reply = render(&Outcome::ListReply(items(&["buy milk", "walk dog"])));
        assert_eq!(
            reply,
            Reply {
                text: "📋 Your Todo List:\n\n• buy milk\n• walk dog".to_string(),
                selection: None,
            }
        );
    }

    #[test]
    fn selection_prompt_and_completion_carry_keyboard() {
        let prompt = render(&Outcome::SelectionPrompt(items(&["a", "b"])));
        assert_eq!(prompt.selection, Some(items(&["a", "b"])));

        let completed = render(&Outcome::ItemCompleted(items(&["b"])));
        assert_eq!(completed.selection, Some(items(&["b"])));
        assert!(completed.text.starts_with("✅ Item completed!"));
    }

    #[test]
    fn item_added_shows_current_items() {
        let reply = render(&Outcome::ItemAdded(items(&["buy milk"])));
        assert!(reply.text.ends_with("📋 Current items:\n• buy milk"));
        assert!(reply.selection.is_none());
    }

    #[test]
    fn plain_outcomes_have_no_keyboard() {
        for outcome in [
            Outcome::Welcome,
            Outcome::EmptyListNotice,
            Outcome::AllDone,
            Outcome::UnknownCommand,
        ] {
            let reply = render(&outcome);
            assert!(reply.selection.is_none());
            assert!(!reply.text.is_empty());
        }
    }
}
