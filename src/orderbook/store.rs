//! Book storage behind the reconciliation engine.
//!
//! The engine never touches price levels itself; it loads snapshots, applies
//! updates and reads sequence numbers through [`BookStore`]. Stores provide
//! their own locking and must be safe to call from many tasks at once.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::error::Error;
use crate::types::{BookKey, Snapshot, Update, UpdateId};

use super::Orderbook;

/// Storage for the books the engine keeps in sync
pub trait BookStore: Send + Sync {
    /// Sequence number of the last snapshot or update applied to `key`
    ///
    /// # Errors
    ///
    /// [`Error::BookNotFound`] if no snapshot was ever loaded,
    /// [`Error::BookInvalid`] if the book was invalidated since.
    fn last_update_id(&self, key: &BookKey) -> Result<UpdateId, Error>;

    /// Replace the book for the snapshot's key, creating it if needed
    fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error>;

    /// Apply an update to the book for the update's key
    fn update(&self, update: &Update) -> Result<(), Error>;

    /// Mark a book as untrustworthy until the next snapshot
    ///
    /// # Errors
    ///
    /// [`Error::BookNotFound`] if no such book exists.
    fn invalidate(&self, key: &BookKey) -> Result<(), Error>;
}

#[derive(Debug)]
struct BookEntry {
    book: Orderbook,
    valid: bool,
}

/// In-memory [`BookStore`]
///
/// # Thread Safety
///
/// A single `parking_lot::RwLock` guards the map. Reads (`best_bid`,
/// `last_update_id`, ...) share the lock, writes take it exclusively for the
/// duration of one snapshot or update.
///
/// # Example
///
/// ```rust
/// use orderbook_sync::orderbook::{BookStore, MemoryBookStore};
/// use orderbook_sync::types::{Asset, Pair, Snapshot};
///
/// let store = MemoryBookStore::new();
/// let snapshot = Snapshot::new(Pair::new("BTC", "USDT"), Asset::Spot, 10);
/// store.load_snapshot(&snapshot).unwrap();
/// assert_eq!(store.last_update_id(&snapshot.key()).unwrap(), 10);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBookStore {
    books: RwLock<FxHashMap<BookKey, BookEntry>>,
}

impl MemoryBookStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of a book
    ///
    /// Returns a cloned copy for safe reading without holding locks.
    pub fn book(&self, key: &BookKey) -> Option<Orderbook> {
        self.books.read().get(key).map(|e| e.book.clone())
    }

    /// Whether the book exists and has not been invalidated
    pub fn is_valid(&self, key: &BookKey) -> bool {
        self.books.read().get(key).is_some_and(|e| e.valid)
    }

    /// Get best bid for a book
    pub fn best_bid(&self, key: &BookKey) -> Option<(Decimal, Decimal)> {
        self.with_valid(key, Orderbook::best_bid)
    }

    /// Get best ask for a book
    pub fn best_ask(&self, key: &BookKey) -> Option<(Decimal, Decimal)> {
        self.with_valid(key, Orderbook::best_ask)
    }

    /// Get mid price for a book
    pub fn mid_price(&self, key: &BookKey) -> Option<Decimal> {
        self.with_valid(key, Orderbook::mid_price)
    }

    /// Get spread for a book
    pub fn spread(&self, key: &BookKey) -> Option<Decimal> {
        self.with_valid(key, Orderbook::spread)
    }

    /// Get number of stored books
    pub fn len(&self) -> usize {
        self.books.read().len()
    }

    /// Check if the store has no books
    pub fn is_empty(&self) -> bool {
        self.books.read().is_empty()
    }

    /// Get all stored book keys
    pub fn keys(&self) -> Vec<BookKey> {
        self.books.read().keys().cloned().collect()
    }

    fn with_valid<T>(&self, key: &BookKey, f: impl FnOnce(&Orderbook) -> Option<T>) -> Option<T> {
        let books = self.books.read();
        books.get(key).filter(|e| e.valid).and_then(|e| f(&e.book))
    }
}

impl BookStore for MemoryBookStore {
    fn last_update_id(&self, key: &BookKey) -> Result<UpdateId, Error> {
        let books = self.books.read();
        match books.get(key) {
            Some(entry) if entry.valid => Ok(entry.book.last_update_id()),
            Some(_) => Err(Error::BookInvalid(key.clone())),
            None => Err(Error::BookNotFound(key.clone())),
        }
    }

    fn load_snapshot(&self, snapshot: &Snapshot) -> Result<(), Error> {
        if snapshot.pair.is_empty() {
            return Err(Error::EmptyPair);
        }
        let key = snapshot.key();
        let mut books = self.books.write();
        let entry = books.entry(key.clone()).or_insert_with(|| BookEntry {
            book: Orderbook::new(key),
            valid: false,
        });
        entry.book.load_snapshot(snapshot);
        entry.valid = true;
        Ok(())
    }

    fn update(&self, update: &Update) -> Result<(), Error> {
        let key = update.key();
        let mut books = self.books.write();
        match books.get_mut(&key) {
            Some(entry) if entry.valid => entry.book.apply_update(update),
            Some(_) => Err(Error::BookInvalid(key)),
            None => Err(Error::BookNotFound(key)),
        }
    }

    fn invalidate(&self, key: &BookKey) -> Result<(), Error> {
        let mut books = self.books.write();
        let entry = books
            .get_mut(key)
            .ok_or_else(|| Error::BookNotFound(key.clone()))?;
        entry.book.clear();
        entry.valid = false;
        Ok(())
    }
}
