use std::collections::HashSet;

use crate::message::Message;

/// Waits for a set of named steps and produces a message when the last one
/// completes.
///
/// An actor that kicks off several asynchronous steps adds one item per step,
/// completes them from the handlers of the replies, and stimulates or sends
/// the returned message once everything is in.
///
/// ```
/// use colony::prelude::*;
///
/// let mut homing = CompletionSet::new(Message::new("AllAxesHomed"));
/// homing.add_item("x");
/// homing.add_item("y");
///
/// assert!(homing.complete_item("x").is_none());
/// assert_eq!(homing.complete_item("y").unwrap().name(), "AllAxesHomed");
/// assert!(homing.complete_item("y").is_none());
/// ```
#[derive(Debug, Clone)]
pub struct CompletionSet {
    pending: HashSet<String>,
    completion: Message,
}

impl CompletionSet {
    pub fn new(completion: Message) -> Self {
        Self {
            pending: HashSet::new(),
            completion,
        }
    }

    /// Wait for `item` as well. Returns false if it was already pending.
    pub fn add_item(&mut self, item: impl Into<String>) -> bool {
        self.pending.insert(item.into())
    }

    /// Mark `item` complete.
    ///
    /// Returns the completion message when this was the last pending item.
    /// Completing an unknown or already completed item returns `None`, so
    /// the message is produced once per round of items.
    pub fn complete_item(&mut self, item: &str) -> Option<Message> {
        if self.pending.remove(item) && self.pending.is_empty() {
            Some(self.completion.clone())
        } else {
            None
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_after_last_item() {
        let mut set = CompletionSet::new(Message::new("my-event"));
        for item in ["one", "two", "three"] {
            assert!(set.add_item(item));
        }
        assert!(!set.add_item("two"));

        assert!(set.complete_item("one").is_none());
        assert!(set.complete_item("two").is_none());
        assert!(!set.is_complete());
        assert_eq!(set.pending().collect::<Vec<_>>(), vec!["three"]);

        let done = set.complete_item("three").unwrap();
        assert_eq!(done.name(), "my-event");
        assert!(set.is_complete());
    }

    #[test]
    fn test_unknown_items_do_not_complete() {
        let mut set = CompletionSet::new(Message::new("done"));
        assert!(set.complete_item("ghost").is_none());

        set.add_item("a");
        assert!(set.complete_item("b").is_none());
        assert!(set.complete_item("a").is_some());

        // A new round re-arms the set.
        set.add_item("c");
        assert!(set.complete_item("c").is_some());
    }
}
