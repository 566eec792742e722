//! Tool-call reassembly
//!
//! Providers stream a tool call as many small deltas. Two addressing
//! schemes are supported:
//!
//! - indexed: every delta names the call it belongs to by `index`, several
//!   calls may be in flight at once, and all of them finalize when the
//!   stream ends;
//! - sequential: a block is opened, fragments go to the current block, and
//!   closing the block finalizes it.
//!
//! Argument fragments are concatenated in delivery order, never reordered,
//! and each call is handed out exactly once.

use std::collections::BTreeMap;

use crate::tool::ToolCall;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialCall {
    fn new(id: Option<&str>, name: Option<&str>) -> Self {
        let mut call = Self::default();
        call.absorb(id, name, None);
        call
    }

    fn absorb(&mut self, id: Option<&str>, name: Option<&str>, fragment: Option<&str>) {
        if self.id.is_empty() {
            if let Some(id) = id.filter(|s| !s.is_empty()) {
                self.id = id.to_string();
            }
        }
        if self.name.is_empty() {
            if let Some(name) = name.filter(|s| !s.is_empty()) {
                self.name = name.to_string();
            }
        }
        if let Some(fragment) = fragment {
            self.arguments.push_str(fragment);
        }
    }

    fn finalize(self) -> ToolCall {
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id
        };
        ToolCall {
            id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

/// Reassembles streamed tool-call fragments into complete [`ToolCall`]s
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    indexed: BTreeMap<usize, PartialCall>,
    last_index: Option<usize>,
    current: Option<PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an indexed delta.
    ///
    /// Without an index, a delta carrying an id opens a new call and any
    /// other delta continues the most recently opened one.
    pub fn apply_indexed(
        &mut self,
        index: Option<usize>,
        id: Option<&str>,
        name: Option<&str>,
        fragment: Option<&str>,
    ) -> usize {
        let index = match index {
            Some(index) => index,
            None => {
                let opens_new = id.is_some_and(|id| {
                    !id.is_empty()
                        && self
                            .last_index
                            .and_then(|i| self.indexed.get(&i))
                            .is_none_or(|call| !call.id.is_empty() && call.id != id)
                });
                match self.last_index {
                    Some(last) if !opens_new => last,
                    Some(_) => self.next_free_index(),
                    None => 0,
                }
            }
        };

        self.indexed
            .entry(index)
            .or_default()
            .absorb(id, name, fragment);
        self.last_index = Some(index);
        index
    }

    fn next_free_index(&self) -> usize {
        self.indexed.keys().next_back().map_or(0, |last| last + 1)
    }

    /// Open a new sequential block, finalizing one left open
    pub fn begin_block(&mut self, id: Option<&str>, name: Option<&str>) -> Option<ToolCall> {
        let previous = self.finish_block();
        self.current = Some(PartialCall::new(id, name));
        previous
    }

    /// Append an argument fragment to the current block.
    ///
    /// Returns `false` when no block is open and the fragment was dropped.
    pub fn append_to_block(&mut self, fragment: &str) -> bool {
        match self.current.as_mut() {
            Some(call) => {
                call.arguments.push_str(fragment);
                true
            }
            None => false,
        }
    }

    /// Close the current block
    pub fn finish_block(&mut self) -> Option<ToolCall> {
        self.current.take().map(PartialCall::finalize)
    }

    /// Whether a sequential block is open
    pub fn has_open_block(&self) -> bool {
        self.current.is_some()
    }

    /// Finalize everything still pending: indexed calls in index order,
    /// then an open block.
    pub fn finish_all(&mut self) -> Vec<ToolCall> {
        let mut calls: Vec<ToolCall> = std::mem::take(&mut self.indexed)
            .into_values()
            .map(PartialCall::finalize)
            .collect();
        self.last_index = None;
        calls.extend(self.finish_block());
        calls
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.current.is_none()
    }
}
