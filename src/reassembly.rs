//! Reassembly of replies that span several 13 byte subframes (cell voltages, cell temperatures).
//!
//! Every subframe payload starts with a 1-based sequence number followed by a fixed number of
//! items. A subframe carrying the wrong sequence number is skipped and its items are lost; the
//! following subframes are still checked against their own position.

use crate::protocol::{FRAME_LENGTH, MAX_CELLS, MAX_TEMPERATURE_SENSORS};
use crate::{Error, Result};

/// Shape of one multi-subframe reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubframeLayout {
    pub items_per_subframe: usize,
    pub item_width: usize,
    pub max_subframes: usize,
    /// Size of the destination array.
    pub capacity: usize,
}

pub const CELL_VOLTAGES: SubframeLayout = SubframeLayout {
    items_per_subframe: 3,
    item_width: 2,
    max_subframes: 16,
    capacity: MAX_CELLS,
};

pub const CELL_TEMPERATURES: SubframeLayout = SubframeLayout {
    items_per_subframe: 7,
    item_width: 1,
    max_subframes: 3,
    capacity: MAX_TEMPERATURE_SENSORS,
};

impl SubframeLayout {
    fn data_length(&self) -> usize {
        1 + self.items_per_subframe * self.item_width
    }
}

/// Progress of one reply being reassembled.
#[derive(Debug)]
pub struct ReassemblyState<T> {
    layout: SubframeLayout,
    expected_sequence: u8,
    remaining: usize,
    items: Vec<T>,
}

impl<T> ReassemblyState<T> {
    pub fn new(layout: SubframeLayout, count: u8) -> Result<Self> {
        if usize::from(count) > layout.capacity {
            return Err(Error::CapacityExceeded {
                count,
                capacity: layout.capacity,
            });
        }
        Ok(Self {
            layout,
            expected_sequence: 1,
            remaining: usize::from(count),
            items: Vec::with_capacity(usize::from(count)),
        })
    }

    pub fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Feeds the next subframe payload (sequence number first) in arrival order.
    ///
    /// The expected sequence number advances whether or not the subframe was accepted.
    pub fn accept(&mut self, subframe: &[u8], decode_item: impl Fn(&[u8]) -> T) -> Result<()> {
        let expected = self.expected_sequence;
        self.expected_sequence = self.expected_sequence.wrapping_add(1);

        if subframe.len() < self.layout.data_length() {
            return Err(Error::FrameTooShort {
                required: self.layout.data_length(),
                received: subframe.len(),
            });
        }
        if subframe[0] != expected {
            return Err(Error::SequenceMismatch {
                expected,
                received: subframe[0],
            });
        }

        for item in subframe[1..self.layout.data_length()].chunks_exact(self.layout.item_width) {
            if self.is_complete() {
                break;
            }
            self.items.push(decode_item(item));
            self.remaining -= 1;
        }
        Ok(())
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}

/// Walks the subframes of `payload` until `count` items are placed or the subframe budget of
/// `layout` is spent, and returns the items in arrival order.
///
/// Fewer than `count` items come back when subframes were skipped or the reply was cut short.
pub fn reassemble<T>(
    payload: &[u8],
    layout: &SubframeLayout,
    count: u8,
    decode_item: impl Fn(&[u8]) -> T,
) -> Result<Vec<T>> {
    let mut state = ReassemblyState::new(*layout, count)?;

    for (n_frame, subframe) in payload
        .chunks(FRAME_LENGTH)
        .take(layout.max_subframes)
        .enumerate()
    {
        if state.is_complete() {
            break;
        }
        match state.accept(subframe, &decode_item) {
            Ok(()) => {
                log::trace!("Subframe #{} accepted", n_frame + 1);
            }
            Err(err @ Error::SequenceMismatch { .. }) => {
                log::warn!("{err}, subframe dropped");
            }
            Err(err) => {
                log::warn!("Reply ends at subframe #{}: {err}", n_frame + 1);
                break;
            }
        }
    }

    if !state.is_complete() {
        log::warn!("Reassembled {} of {} items", state.items.len(), count);
    }
    Ok(state.into_items())
}
