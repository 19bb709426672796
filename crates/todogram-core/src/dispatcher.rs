//! Command dispatch for one incoming text against one owner's list

use std::sync::Arc;
use todogram_storage::{ItemStore, StorageError};
use tracing::{debug, warn};

pub const COMMAND_PREFIX: char = '/';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    List,
    Done,
}

impl Command {
    /// Exact match on the whole text. In group chats Telegram addresses
    /// commands as `/done@botname`, accepted only for our own username.
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Command> {
        let name = match text.split_once('@') {
            Some((name, target)) => {
                let addressed_to_us =
                    bot_username.is_some_and(|bot| target.eq_ignore_ascii_case(bot));
                if !addressed_to_us {
                    return None;
                }
                name
            }
            None => text,
        };

        match name {
            "/start" => Some(Command::Start),
            "/list" => Some(Command::List),
            "/done" => Some(Command::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Welcome,
    ListReply(Vec<String>),
    EmptyListNotice,
    SelectionPrompt(Vec<String>),
    ItemCompleted(Vec<String>),
    AllDone,
    UnknownCommand,
    ItemAdded(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Add(String),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub mutation: Option<Mutation>,
}

impl Decision {
    fn reply(outcome: Outcome) -> Self {
        Self {
            outcome,
            mutation: None,
        }
    }
}

/// Decides what `text` means given the owner's current `items`.
///
/// Commands win over item matches, so an item whose text is literally
/// `/list` can never be selected by typing it.
pub fn decide(items: &[String], text: &str, bot_username: Option<&str>) -> Decision {
    match Command::parse(text, bot_username) {
        Some(Command::Done) if items.is_empty() => Decision::reply(Outcome::EmptyListNotice),
        Some(Command::Done) => Decision::reply(Outcome::SelectionPrompt(items.to_vec())),
        Some(Command::Start) => Decision::reply(Outcome::Welcome),
        Some(Command::List) if items.is_empty() => Decision::reply(Outcome::EmptyListNotice),
        Some(Command::List) => Decision::reply(Outcome::ListReply(items.to_vec())),
        None if text.starts_with(COMMAND_PREFIX) => Decision::reply(Outcome::UnknownCommand),
        None if items.iter().any(|item| item == text) => {
            let remaining: Vec<String> = items.iter().filter(|i| *i != text).cloned().collect();
            Decision {
                outcome: completion(remaining),
                mutation: Some(Mutation::Delete(text.to_string())),
            }
        }
        None => {
            let mut current = items.to_vec();
            current.push(text.to_string());
            Decision {
                outcome: Outcome::ItemAdded(current),
                mutation: Some(Mutation::Add(text.to_string())),
            }
        }
    }
}

fn completion(remaining: Vec<String>) -> Outcome {
    if remaining.is_empty() {
        Outcome::AllDone
    } else {
        Outcome::ItemCompleted(remaining)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct Dispatcher<S> {
    store: Arc<S>,
    bot_username: Option<String>,
}

impl<S: ItemStore> Dispatcher<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            bot_username: None,
        }
    }

    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.bot_username = Some(username.into());
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Reads the owner's list, decides, and applies the mutation.
    ///
    /// Errors mean nothing may be reported to the user: either the read
    /// failed or the mutation did not commit.
    pub fn dispatch(&self, owner: &str, text: &str) -> Result<Outcome, DispatchError> {
        let items = self.store.list(owner)?;
        let decision = decide(&items, text, self.bot_username.as_deref());

        let Some(mutation) = decision.mutation else {
            return Ok(decision.outcome);
        };

        match &mutation {
            Mutation::Add(description) => self.store.add(owner, description)?,
            Mutation::Delete(description) => {
                let removed = self.store.delete(owner, description)?;
                if removed == 0 {
                    debug!(owner, "Selected item was already gone");
                }
            }
        }

        // The reply shows the list as stored after the write.
        match self.store.list(owner) {
            Ok(items) => Ok(match mutation {
                Mutation::Add(_) => Outcome::ItemAdded(items),
                Mutation::Delete(_) => completion(items),
            }),
            Err(err) => {
                warn!(owner, "Re-reading list after write failed: {}", err);
                Ok(decision.outcome)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decide, Command, Decision, Dispatcher, Mutation, Outcome};
    use std::sync::Arc;
    use todogram_storage::{ItemStore, SqliteStore, StorageError};

    fn items(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn dispatcher_with(owner: &str, initial: &[&str]) -> Dispatcher<SqliteStore> {
        let store = SqliteStore::open_in_memory().expect("store");
        for item in initial {
            store.add(owner, item).expect("seed");
        }
        Dispatcher::new(Arc::new(store))
    }

    /// Reads fine, refuses every write.
    struct ReadOnlyStore(SqliteStore);

    impl ItemStore for ReadOnlyStore {
        fn add(&self, _owner: &str, _description: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disk full".to_string()))
        }
        fn delete(&self, _owner: &str, _description: &str) -> Result<usize, StorageError> {
            Err(StorageError::Unavailable("disk full".to_string()))
        }
        fn list(&self, owner: &str) -> Result<Vec<String>, StorageError> {
            self.0.list(owner)
        }
        fn count(&self, owner: &str) -> Result<usize, StorageError> {
            self.0.count(owner)
        }
    }

    #[test]
    fn command_parse_is_exact() {
        assert_eq!(Command::parse("/done", None), Some(Command::Done));
        assert_eq!(Command::parse("/start", None), Some(Command::Start));
        assert_eq!(Command::parse("/list", None), Some(Command::List));
        assert_eq!(Command::parse("/done ", None), None);
        assert_eq!(Command::parse("/Done", None), None);
        assert_eq!(Command::parse("/donez", None), None);
        assert_eq!(Command::parse("done", None), None);
    }

    #[test]
    fn command_parse_accepts_own_bot_suffix_only() {
        assert_eq!(
            Command::parse("/done@Todo_Bot", Some("todo_bot")),
            Some(Command::Done)
        );
        assert_eq!(Command::parse("/done@other_bot", Some("todo_bot")), None);
        assert_eq!(Command::parse("/done@todo_bot", None), None);
    }

    #[test]
    fn done_with_items_prompts_selection_without_mutation() {
        let decision = decide(&items(&["buy milk", "walk dog"]), "/done", None);
        assert_eq!(
            decision,
            Decision {
                outcome: Outcome::SelectionPrompt(items(&["buy milk", "walk dog"])),
                mutation: None,
            }
        );
    }

    #[test]
    fn done_and_list_on_empty_list_give_notice() {
        assert_eq!(decide(&[], "/done", None).outcome, Outcome::EmptyListNotice);
        assert_eq!(decide(&[], "/list", None).outcome, Outcome::EmptyListNotice);
    }

    #[test]
    fn start_and_list_never_mutate() {
        let current = items(&["buy milk"]);
        assert_eq!(decide(&current, "/start", None), Decision::reply(Outcome::Welcome));
        assert_eq!(
            decide(&current, "/list", None),
            Decision::reply(Outcome::ListReply(current.clone()))
        );
    }

    #[test]
    fn unknown_slash_text_is_unknown_command_even_if_listed() {
        let current = items(&["/weird"]);
        assert_eq!(
            decide(&current, "/weird", None),
            Decision::reply(Outcome::UnknownCommand)
        );
        assert_eq!(
            decide(&[], "/done@other_bot", Some("todo_bot")).outcome,
            Outcome::UnknownCommand
        );
    }

    #[test]
    fn item_named_like_a_command_is_not_selectable() {
        let current = items(&["/list"]);
        assert_eq!(
            decide(&current, "/list", None),
            Decision::reply(Outcome::ListReply(current.clone()))
        );
    }

    #[test]
    fn matching_item_is_deleted() {
        let decision = decide(&items(&["buy milk", "walk dog"]), "buy milk", None);
        assert_eq!(decision.outcome, Outcome::ItemCompleted(items(&["walk dog"])));
        assert_eq!(decision.mutation, Some(Mutation::Delete("buy milk".to_string())));
    }

    #[test]
    fn last_item_deleted_is_all_done() {
        let decision = decide(&items(&["walk dog"]), "walk dog", None);
        assert_eq!(decision.outcome, Outcome::AllDone);
    }

    #[test]
    fn item_match_is_case_sensitive() {
        let decision = decide(&items(&["Buy milk"]), "buy milk", None);
        assert_eq!(decision.mutation, Some(Mutation::Add("buy milk".to_string())));
    }

    #[test]
    fn empty_text_is_added_as_item() {
        let decision = decide(&[], "", None);
        assert_eq!(decision.outcome, Outcome::ItemAdded(items(&[""])));
        assert_eq!(decision.mutation, Some(Mutation::Add(String::new())));
    }

    #[test]
    fn decide_is_deterministic() {
        let current = items(&["a", "b", "a"]);
        for text in ["/done", "/start", "/list", "/x", "a", "c", ""] {
            assert_eq!(decide(&current, text, None), decide(&current, text, None));
        }
    }

    #[test]
    fn free_text_is_added_to_empty_list() {
        let dispatcher = dispatcher_with("U1", &[]);
        let outcome = dispatcher.dispatch("U1", "buy milk").expect("dispatch");
        assert_eq!(outcome, Outcome::ItemAdded(items(&["buy milk"])));
        assert_eq!(
            dispatcher.store().list("U1").expect("list"),
            items(&["buy milk"])
        );
    }

    #[test]
    fn done_lists_items_for_selection() {
        let dispatcher = dispatcher_with("U1", &["buy milk", "walk dog"]);
        let outcome = dispatcher.dispatch("U1", "/done").expect("dispatch");
        assert_eq!(
            outcome,
            Outcome::SelectionPrompt(items(&["buy milk", "walk dog"]))
        );
        assert_eq!(dispatcher.store().count("U1").expect("count"), 2);
    }

    #[test]
    fn selecting_an_item_completes_it() {
        let dispatcher = dispatcher_with("U1", &["buy milk", "walk dog"]);
        let outcome = dispatcher.dispatch("U1", "buy milk").expect("dispatch");
        assert_eq!(outcome, Outcome::ItemCompleted(items(&["walk dog"])));
        assert_eq!(
            dispatcher.store().list("U1").expect("list"),
            items(&["walk dog"])
        );
    }

    #[test]
    fn selecting_last_item_empties_list() {
        let dispatcher = dispatcher_with("U1", &["walk dog"]);
        let outcome = dispatcher.dispatch("U1", "walk dog").expect("dispatch");
        assert_eq!(outcome, Outcome::AllDone);
        assert!(dispatcher.store().list("U1").expect("list").is_empty());
    }

    #[test]
    fn owners_do_not_see_each_other() {
        let dispatcher = dispatcher_with("U1", &["buy milk"]);
        let outcome = dispatcher.dispatch("U2", "buy milk").expect("dispatch");
        assert_eq!(outcome, Outcome::ItemAdded(items(&["buy milk"])));
        assert_eq!(
            dispatcher.store().list("U1").expect("list"),
            items(&["buy milk"])
        );
    }

    #[test]
    fn bot_suffix_reaches_command() {
        let dispatcher = dispatcher_with("U1", &["buy milk"]).with_bot_username("todo_bot");
        let outcome = dispatcher.dispatch("U1", "/list@todo_bot").expect("dispatch");
        assert_eq!(outcome, Outcome::ListReply(items(&["buy milk"])));
    }

    #[test]
    fn failed_write_is_an_error_and_leaves_list_unchanged() {
        let inner = SqliteStore::open_in_memory().expect("store");
        inner.add("U1", "walk dog").expect("seed");
        let dispatcher = Dispatcher::new(Arc::new(ReadOnlyStore(inner)));

        let err = dispatcher.dispatch("U1", "buy milk").expect_err("add fails");
        assert!(err.to_string().contains("storage unavailable"));
        assert!(dispatcher.dispatch("U1", "walk dog").is_err());
        assert_eq!(
            dispatcher.store().list("U1").expect("list"),
            items(&["walk dog"])
        );
    }

    #[test]
    fn reads_still_work_when_writes_fail() {
        let inner = SqliteStore::open_in_memory().expect("store");
        inner.add("U1", "walk dog").expect("seed");
        let dispatcher = Dispatcher::new(Arc::new(ReadOnlyStore(inner)));

        assert_eq!(
            dispatcher.dispatch("U1", "/list").expect("list"),
            Outcome::ListReply(items(&["walk dog"]))
        );
    }
}
