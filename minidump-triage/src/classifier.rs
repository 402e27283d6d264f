//! First-match classification of a call stack.
//!
//! The stack is scanned from the innermost frame outwards and, for every
//! frame, the filters are tried in their declared order. The first frame that
//! any filter accepts wins, and among the filters accepting it the earliest
//! declared one is picked. Frame order dominates because frames closer to the
//! fault are the better predictors of its cause; filter order only breaks ties
//! on the same frame.

use tracing::trace;

use crate::{Filter, StackFrame};

/// The frame and filter that decided a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match<'a> {
    /// Index of the frame in the stack, 0 being the innermost frame.
    pub frame_index: usize,
    pub frame: &'a StackFrame,
    /// Index of the filter in the list it was picked from.
    pub filter_index: usize,
    pub filter: &'a Filter,
}

/// The outcome of classifying one stack. Not matching anything is a normal
/// outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification<'a> {
    pub stack: &'a [StackFrame],
    pub matched: Option<Match<'a>>,
}

impl<'a> Classification<'a> {
    /// Classify `stack` against `filters`.
    pub fn new<F: AsRef<Filter>>(stack: &'a [StackFrame], filters: &'a [F]) -> Classification<'a> {
        Classification {
            stack,
            matched: classify(stack, filters),
        }
    }

    pub fn matched_frame(&self) -> Option<&'a StackFrame> {
        self.matched.map(|m| m.frame)
    }

    pub fn matched_filter(&self) -> Option<&'a Filter> {
        self.matched.map(|m| m.filter)
    }

    /// Whether the frame at `index` is the one that matched.
    pub fn is_matched_frame(&self, index: usize) -> bool {
        self.matched.is_some_and(|m| m.frame_index == index)
    }
}

/// Find the first frame matched by any of `filters`.
///
/// `filters` can be bare [`Filter`]s or anything wrapping one, like
/// [`OwnershipData`](crate::OwnershipData). Returns `None` for an empty stack,
/// an empty filter list, or when nothing matches.
pub fn classify<'a, F: AsRef<Filter>>(
    stack: &'a [StackFrame],
    filters: &'a [F],
) -> Option<Match<'a>> {
    for (frame_index, frame) in stack.iter().enumerate() {
        for (filter_index, filter) in filters.iter().map(AsRef::as_ref).enumerate() {
            if filter.matches(frame) {
                trace!("classify: frame {frame_index} ({frame}) matched {filter}");
                return Some(Match {
                    frame_index,
                    frame,
                    filter_index,
                    filter,
                });
            }
        }
        trace!("classify: frame {frame_index} ({frame}) matched nothing");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameField, Owner, OwnershipData, OwnershipTable};

    fn module(name: &str) -> Filter {
        Filter::exact(FrameField::Module, name).unwrap()
    }

    fn frame(name: &str) -> StackFrame {
        StackFrame::in_module(name, 0x10)
    }

    #[test]
    fn frame_order_dominates_filter_order() {
        let filters = [module("moduleA"), module("moduleB")];
        let stack = [frame("moduleC"), frame("moduleB"), frame("moduleA")];

        let m = classify(&stack, &filters).unwrap();
        assert_eq!(m.frame_index, 1);
        assert_eq!(m.frame, &stack[1]);
        assert_eq!(m.filter_index, 1);
        assert_eq!(m.filter, &filters[1]);
    }

    #[test]
    fn filter_order_breaks_ties_on_one_frame() {
        let filters = [
            Filter::substring(FrameField::Function, "Alloc").unwrap(),
            Filter::exact(FrameField::Module, "ntdll.dll").unwrap(),
        ];
        let stack = [StackFrame::in_function("ntdll.dll", "RtlAllocateHeap", 0)];

        let m = classify(&stack, &filters).unwrap();
        assert_eq!(m.filter_index, 0);

        let reversed = [filters[1].clone(), filters[0].clone()];
        let m = classify(&stack, &reversed).unwrap();
        assert_eq!(m.filter, &reversed[0]);
    }

    #[test]
    fn empty_inputs_and_misses() {
        let filters = [module("moduleA")];
        let stack = [frame("moduleB"), StackFrame::with_address(0x45)];
        let none: [Filter; 0] = [];

        assert_eq!(classify(&[], &filters), None);
        assert_eq!(classify(&stack, &none), None);
        assert_eq!(classify(&stack, &filters), None);
    }

    #[test]
    fn earlier_frames_match_nothing() {
        let filters = [module("d"), module("b"), module("e")];
        let stack = [frame("a"), frame("c"), frame("b"), frame("d")];
        let m = classify(&stack, &filters).unwrap();
        for earlier in &stack[..m.frame_index] {
            assert!(filters.iter().all(|f| !f.matches(earlier)));
        }
        assert_eq!(
            filters.iter().position(|f| f.matches(m.frame)),
            Some(m.filter_index)
        );
    }

    #[test]
    fn deterministic() {
        let filters = [module("b"), Filter::substring(FrameField::Module, "a").unwrap()];
        let stack = [frame("x"), frame("ab"), frame("b")];
        let first = classify(&stack, &filters);
        for _ in 0..10 {
            assert_eq!(classify(&stack, &filters), first);
        }
    }

    #[test]
    fn works_over_ownership_entries() {
        let table = OwnershipTable::new(
            vec![
                OwnershipData::new(module("moduleA"), Owner::new("Alice")),
                OwnershipData::new(module("moduleB"), Owner::new("Bob")),
            ],
            Owner::new("Triage"),
        );
        let stack = [frame("moduleC"), frame("moduleB"), frame("moduleA")];

        let classification = Classification::new(&stack, table.entries());
        assert!(classification.is_matched_frame(1));
        assert!(!classification.is_matched_frame(2));
        let filter = classification.matched_filter().unwrap();
        assert_eq!(table.owner_for(filter).name(), "Bob");
    }
}
