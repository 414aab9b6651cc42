use std::collections::HashSet;

/// Remembers records already seen within one parse.
///
/// Keyed by the exact record text, so distinct records never collide.
#[derive(Debug, Default, Clone)]
pub struct UniquenessRegister {
    seen: HashSet<String>,
}

impl UniquenessRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `record` is offered, false afterwards
    pub fn is_unique(&mut self, record: &str) -> bool {
        if self.seen.contains(record) {
            return false;
        }
        self.seen.insert(record.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
