use crate::command::CommandHandle;

/// Position of a run inside its target list.
///
/// The list is read afresh at every step, so removals made by the retention
/// policy are seen by the same pass: removing the current element leaves the
/// cursor where it is and the next element slides under it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ListCursor {
    index: usize,
}

impl ListCursor {
    pub(crate) fn start() -> Self {
        Self::default()
    }

    pub(crate) fn current(&self, list: &[CommandHandle]) -> Option<CommandHandle> {
        list.get(self.index).cloned()
    }

    pub(crate) fn advance(&mut self) {
        self.index += 1;
    }

    /// Take `visited` out of `list` without moving the cursor.
    ///
    /// `visited` is normally still under the cursor; if the list moved
    /// underneath the run it is looked up by identity instead, and the cursor
    /// steps back when the removal happened before it.
    pub(crate) fn remove_current(
        &mut self,
        list: &mut Vec<CommandHandle>,
        visited: &CommandHandle,
    ) -> Option<CommandHandle> {
        if list.get(self.index).is_some_and(|c| c.ptr_eq(visited)) {
            return Some(list.remove(self.index));
        }
        let at = list.iter().position(|c| c.ptr_eq(visited))?;
        if at < self.index {
            self.index -= 1;
        }
        Some(list.remove(at))
    }
}
