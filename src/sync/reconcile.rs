//! Pure merge of change events and optimistic mutations into a collection.

use chrono::{DateTime, Utc};

use super::{Collection, Record};

/// A change to one record, as observed from the feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent<R> {
    Insert(R),
    Update { old: Option<R>, new: R },
    Delete { id: String },
}

impl<R: Record> ChangeEvent<R> {
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(record) => record.id(),
            ChangeEvent::Update { new, .. } => new.id(),
            ChangeEvent::Delete { id } => id,
        }
    }
}

/// A local edit applied ahead of server confirmation.
#[derive(Debug, Clone)]
pub enum Mutation<R: Record> {
    Create(R),
    Apply { id: String, action: R::Action },
}

impl<R: Record> Mutation<R> {
    pub fn id(&self) -> &str {
        match self {
            Mutation::Create(record) => record.id(),
            Mutation::Apply { id, .. } => id,
        }
    }
}

/// Apply one change event under `predicate`.
///
/// Applying the same event twice yields the same collection as applying it once.
pub fn reconcile<R, P>(collection: &Collection<R>, event: &ChangeEvent<R>, predicate: P) -> Collection<R>
where
    R: Record,
    P: Fn(&R) -> bool,
{
    let mut next = collection.clone();
    match event {
        ChangeEvent::Insert(record) => {
            if predicate(record) {
                next.insert(record.clone());
            }
        }
        ChangeEvent::Update { new, .. } => {
            let present = next.contains(new.id());
            match (present, predicate(new)) {
                (true, true) => {
                    next.replace(new.clone());
                }
                (true, false) => {
                    next.remove(new.id());
                }
                (false, true) => {
                    next.insert(new.clone());
                }
                (false, false) => {}
            }
        }
        ChangeEvent::Delete { id } => {
            next.remove(id);
        }
    }
    next
}

/// Apply a local mutation through the same rules as the matching change event.
///
/// `Apply` on a record that is not in the collection changes nothing.
pub fn apply_optimistic<R, P>(
    collection: &Collection<R>,
    mutation: &Mutation<R>,
    predicate: P,
    at: DateTime<Utc>,
) -> Collection<R>
where
    R: Record,
    P: Fn(&R) -> bool,
{
    let event = match mutation {
        Mutation::Create(record) => ChangeEvent::Insert(record.clone()),
        Mutation::Apply { id, action } => match collection.get(id) {
            Some(current) => ChangeEvent::Update {
                old: Some(current.clone()),
                new: current.apply(action, at),
            },
            None => return collection.clone(),
        },
    };
    reconcile(collection, &event, predicate)
}
