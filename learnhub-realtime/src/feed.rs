//! Ordered, de-duplicated item window per feed.
//!
//! Confirmed items are kept sorted by `server_sequence`. Optimistic items sit
//! at the tail in submission order until the server names them. Items are
//! never moved once rendered: replacements and edits happen in place and
//! deletions leave a tombstone.

use serde::Serialize;
use shared::models::{CorrelationId, EntityId, FeedEntry, MessagePayload, NotificationPayload, Page, Timestamp};

use crate::reconciler::local_item_id;

/// One rendered entry of a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Server id, or a local placeholder id while optimistic.
    pub id: EntityId,
    /// Sort key. Placeholders carry the newest sequence seen when they were added.
    pub server_sequence: u64,
    /// Author, when known.
    pub author_id: Option<EntityId>,
    /// Text to render; empty for tombstones.
    pub content: String,
    /// Placeholder awaiting server confirmation.
    pub is_optimistic: bool,
    /// Tombstone left by a deletion.
    pub deleted: bool,
    /// Creation time.
    pub created_at: Option<Timestamp>,
}

impl Item {
    /// Item for a message or answer event.
    #[must_use]
    pub fn from_message(payload: &MessagePayload, server_sequence: u64) -> Self {
        Self {
            id: payload.id.clone(),
            server_sequence,
            author_id: payload.author_id.clone(),
            content: payload.body.clone(),
            is_optimistic: false,
            deleted: false,
            created_at: payload.created_at,
        }
    }

    /// Item for a notification event.
    #[must_use]
    pub fn from_notification(payload: &NotificationPayload, server_sequence: u64) -> Self {
        Self {
            id: payload.id.clone(),
            server_sequence,
            author_id: None,
            content: payload.summary.clone(),
            is_optimistic: false,
            deleted: false,
            created_at: payload.created_at,
        }
    }
}

impl From<FeedEntry> for Item {
    fn from(entry: FeedEntry) -> Self {
        let content = if entry.deleted { String::new() } else { entry.body };
        Self {
            id: entry.id,
            server_sequence: entry.server_sequence,
            author_id: entry.author_id,
            content,
            is_optimistic: false,
            deleted: entry.deleted,
            created_at: entry.created_at,
        }
    }
}

/// Result of placing an authoritative item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new slot was taken.
    Inserted,
    /// An item with the same id was updated where it stands.
    Replaced,
}

/// Items of one topic, oldest first, plus the history cursor.
#[derive(Debug, Clone, Default)]
pub struct FeedWindow {
    items: Vec<Item>,
    cursor: Option<String>,
    exhausted: bool,
}

impl FeedWindow {
    /// Empty window with more history to fetch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an authoritative item by sequence, or replaces the item that
    /// already carries its id without moving it.
    pub fn insert_live(&mut self, item: Item) -> InsertOutcome {
        if let Some(existing) = self.position(&item.id) {
            self.items[existing] = item;
            return InsertOutcome::Replaced;
        }
        let at = self.live_position(item.server_sequence);
        self.items.insert(at, item);
        InsertOutcome::Inserted
    }

    /// Appends a placeholder for a pending mutation and returns its id.
    pub fn insert_optimistic(
        &mut self,
        correlation_id: CorrelationId,
        content: impl Into<String>,
        author_id: Option<EntityId>,
    ) -> EntityId {
        let id = local_item_id(correlation_id);
        let server_sequence = self.max_sequence();
        self.items.push(Item {
            id: id.clone(),
            server_sequence,
            author_id,
            content: content.into(),
            is_optimistic: true,
            deleted: false,
            created_at: Some(Timestamp::now()),
        });
        id
    }

    /// Swaps a placeholder for the server's version of it. The result holds
    /// exactly one item for the mutation whatever arrived first.
    pub fn confirm(&mut self, correlation_id: CorrelationId, item: Item) -> InsertOutcome {
        let local = local_item_id(correlation_id);
        let placeholder = self.position(&local);
        match (placeholder, self.position(&item.id)) {
            (Some(placeholder), Some(_)) => {
                self.items.remove(placeholder);
                self.insert_live(item)
            }
            (Some(placeholder), None) if self.fits_at(placeholder, item.server_sequence) => {
                self.items[placeholder] = item;
                InsertOutcome::Replaced
            }
            (Some(placeholder), None) => {
                self.items.remove(placeholder);
                self.insert_live(item);
                InsertOutcome::Replaced
            }
            (None, _) => self.insert_live(item),
        }
    }

    /// Removes an item outright. Used for rolled-back placeholders.
    pub fn remove(&mut self, id: &EntityId) -> Option<Item> {
        let at = self.position(id)?;
        Some(self.items.remove(at))
    }

    /// Updates content in place. Tombstones stay tombstones.
    pub fn edit(&mut self, id: &EntityId, content: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(item) if !item.deleted => {
                item.content = content.into();
                true
            }
            _ => false,
        }
    }

    /// Clears an item's content and flags it deleted, keeping its slot.
    pub fn tombstone(&mut self, id: &EntityId) -> bool {
        let Some(item) = self.get_mut(id) else {
            return false;
        };
        item.content.clear();
        item.deleted = true;
        true
    }

    /// Merges an older page. Ids already present are left untouched so live
    /// data is never overwritten by history. Returns the newly added items.
    pub fn merge_older(&mut self, page: Page) -> Vec<Item> {
        let mut added = Vec::new();
        for entry in page.items {
            if self.position(&entry.id).is_some() {
                continue;
            }
            let item = Item::from(entry);
            let at = self.live_position(item.server_sequence);
            self.items.insert(at, item.clone());
            added.push(item);
        }
        added.sort_by_key(|item| item.server_sequence);
        self.exhausted = page.next_cursor.is_none();
        self.cursor = page.next_cursor;
        added
    }

    /// Items in display order.
    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Item carrying `id`.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<&Item> {
        self.items.iter().find(|item| &item.id == id)
    }

    /// Number of items, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the window holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Cursor to pass as `before` for the next older page.
    #[must_use]
    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    /// Whether older history may still exist.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        !self.exhausted
    }

    fn get_mut(&mut self, id: &EntityId) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| &item.id == id)
    }

    fn position(&self, id: &EntityId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == id)
    }

    fn max_sequence(&self) -> u64 {
        self.items
            .iter()
            .map(|item| item.server_sequence)
            .max()
            .unwrap_or(0)
    }

    /// Slot for a confirmed item: after every confirmed item with a lower or
    /// equal sequence and before the optimistic tail.
    fn live_position(&self, server_sequence: u64) -> usize {
        self.items
            .iter()
            .position(|item| item.is_optimistic || item.server_sequence > server_sequence)
            .unwrap_or(self.items.len())
    }

    /// Whether `server_sequence` keeps the confirmed prefix sorted at `at`.
    fn fits_at(&self, at: usize, server_sequence: u64) -> bool {
        let after_previous = at == 0 || self.items[at - 1].server_sequence <= server_sequence;
        let before_next = self.items[at + 1..]
            .iter()
            .find(|item| !item.is_optimistic)
            .is_none_or(|next| server_sequence <= next.server_sequence);
        after_previous && before_next
    }
}
