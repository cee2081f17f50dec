use crate::models::Entity;

/// Ordered, id-keyed mirror of one remote collection.
///
/// Insertion order is preserved; an upsert of a known id replaces the entry in
/// place. `upsert` and `remove` are idempotent, which is what makes replayed or
/// duplicated change events harmless.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStore<T> {
    items: Vec<T>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

/// The state of one entry captured before a mutation, for rollback.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot<T> {
    Present { position: usize, item: T },
    Absent { id: i64 },
}

impl<T> Snapshot<T> {
    #[must_use]
    pub fn item(&self) -> Option<&T> {
        match self {
            Self::Present { item, .. } => Some(item),
            Self::Absent { .. } => None,
        }
    }
}

impl<T: Entity> EntityStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything and load `items` in the given order.
    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items.clear();
        for item in items {
            self.upsert(item);
        }
    }

    pub fn upsert(&mut self, item: T) {
        match self.position(item.id()) {
            Some(pos) => self.items[pos] = item,
            None => self.items.push(item),
        }
    }

    pub fn remove(&mut self, id: i64) -> Option<T> {
        let pos = self.position(id)?;
        Some(self.items.remove(pos))
    }

    #[must_use]
    pub fn get(&self, id: i64) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut T> {
        self.items.iter_mut().find(|item| item.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn position(&self, id: i64) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn snapshot(&self, id: i64) -> Snapshot<T> {
        match self.position(id) {
            Some(position) => Snapshot::Present {
                position,
                item: self.items[position].clone(),
            },
            None => Snapshot::Absent { id },
        }
    }

    /// Put an entry back exactly as captured, including its position.
    pub fn restore(&mut self, snapshot: Snapshot<T>) {
        match snapshot {
            Snapshot::Present { position, item } => {
                self.remove(item.id());
                let position = position.min(self.items.len());
                self.items.insert(position, item);
            }
            Snapshot::Absent { id } => {
                self.remove(id);
            }
        }
    }

    /// Swap a provisional entry for the row the remote acknowledged.
    ///
    /// If the feed already delivered the acknowledged row, the provisional entry
    /// is dropped and the delivered entry is replaced in place.
    pub fn settle(&mut self, provisional_id: i64, item: T) {
        if self.contains(item.id()) {
            self.remove(provisional_id);
            self.upsert(item);
        } else if let Some(pos) = self.position(provisional_id) {
            self.items[pos] = item;
        } else {
            self.upsert(item);
        }
    }
}

impl<'a, T> IntoIterator for &'a EntityStore<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut EntityStore<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter_mut()
    }
}
