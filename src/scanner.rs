//! Block boundary detection over a line stream.
//!
//! A message block starts on a line carrying the `JRU` marker and an opening
//! parenthesis, and ends on a line that is exactly `)` once trimmed:
//!
//! ```text
//! 12:00:01 JRU MESSAGE (
//!   NID_MESSAGE : 3
//!   ...
//! )
//! ```

/// Quick check for the start-of-block marker.
#[inline]
pub fn is_block_start(line: &str) -> bool {
    line.contains("JRU") && line.contains('(')
}

#[inline]
pub fn is_block_end(line: &str) -> bool {
    line.trim() == ")"
}

/// Accumulates lines into complete message blocks.
///
/// Forward-only: lines are pushed one at a time and a block is returned as
/// soon as its closing line arrives. A start marker seen while already inside
/// a block is kept as an ordinary line.
#[derive(Debug, Default)]
pub struct LineScanner {
    block: Option<Vec<String>>,
}

impl LineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns the finished block (start and end lines included)
    /// when this line closes one.
    pub fn push(&mut self, line: &str) -> Option<Vec<String>> {
        match self.block.as_mut() {
            None => {
                if is_block_start(line) {
                    self.block = Some(vec![line.to_string()]);
                }
                None
            }
            Some(block) => {
                block.push(line.to_string());
                if is_block_end(line) {
                    self.block.take()
                } else {
                    None
                }
            }
        }
    }

    /// Whether a block is currently open.
    pub fn in_block(&self) -> bool {
        self.block.is_some()
    }

    /// Discard any open block at end of input, returning how many lines it held.
    pub fn finish(&mut self) -> Option<usize> {
        self.block.take().map(|block| block.len())
    }
}
