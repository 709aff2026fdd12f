/// Deterministic priority queue for index-tile fetch dispatch.
///
/// Key properties:
/// - Total ordering on `(priority, id)`.
/// - Equal priorities are popped in insertion order.
/// - No cancellation: once pushed, an item is eventually popped.
///
/// Vec-backed with a linear scan; queues hold a handful of index tiles, so
/// ordering stability matters more than asymptotics.

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkId(pub u64);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Key {
    // Smaller values run earlier.
    priority: i32,
    id: WorkId,
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
struct Item<T> {
    key: Key,
    payload: T,
}

#[derive(Debug)]
pub struct WorkQueue<T> {
    next_id: u64,
    items: Vec<Item<T>>,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            items: Vec::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, priority: i32, payload: T) -> WorkId {
        let id = WorkId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.items.push(Item {
            key: Key { priority, id },
            payload,
        });
        id
    }

    /// Whether any queued payload satisfies `pred`.
    pub fn any(&self, mut pred: impl FnMut(&T) -> bool) -> bool {
        self.items.iter().any(|i| pred(&i.payload))
    }

    /// Pops the next (highest priority, then oldest) item.
    pub fn pop_next(&mut self) -> Option<(WorkId, i32, T)> {
        let idx = self
            .items
            .iter()
            .enumerate()
            .min_by_key(|(_, item)| item.key)
            .map(|(idx, _)| idx)?;
        let item = self.items.swap_remove(idx);
        Some((item.key.id, item.key.priority, item.payload))
    }

    /// Pops at most `limit` items in queue order.
    pub fn pop_up_to(&mut self, limit: usize) -> Vec<T> {
        let mut out = Vec::with_capacity(limit.min(self.items.len()));
        while out.len() < limit {
            let Some((_, _, payload)) = self.pop_next() else {
                break;
            };
            out.push(payload);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::WorkQueue;

    #[test]
    fn same_priority_is_insertion_order() {
        let mut q = WorkQueue::new();
        q.push(0, "a");
        q.push(0, "b");
        q.push(0, "c");

        let (_, _, a) = q.pop_next().unwrap();
        let (_, _, b) = q.pop_next().unwrap();
        let (_, _, c) = q.pop_next().unwrap();
        assert_eq!((a, b, c), ("a", "b", "c"));
    }

    #[test]
    fn lower_priority_value_runs_first() {
        let mut q = WorkQueue::new();
        q.push(10, "late");
        q.push(-1, "early");
        let (_, _, v) = q.pop_next().unwrap();
        assert_eq!(v, "early");
    }

    #[test]
    fn order_survives_interleaved_pops() {
        let mut q = WorkQueue::new();
        q.push(2, "c1");
        q.push(1, "b1");
        q.push(2, "c2");
        assert_eq!(q.pop_next().unwrap().2, "b1");
        q.push(1, "b2");
        q.push(0, "a");
        assert_eq!(q.pop_up_to(10), vec!["a", "b2", "c1", "c2"]);
        assert!(q.is_empty());
    }

    #[test]
    fn pop_up_to_respects_limit() {
        let mut q = WorkQueue::new();
        for i in 0..5 {
            q.push(0, i);
        }
        assert_eq!(q.pop_up_to(2), vec![0, 1]);
        assert_eq!(q.len(), 3);
        assert!(q.any(|v| *v == 4));
        assert!(!q.any(|v| *v == 0));
    }
}
