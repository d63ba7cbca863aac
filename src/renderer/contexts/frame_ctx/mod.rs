pub mod frame;

use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use crate::renderer::contexts::frame_ctx::frame::{FrameSlot, FrameState};
use crate::renderer::vk::api::DeviceApi;

/// Rotating index of the frame-in-flight slot. This is not the index of the
/// presentable image, which the presentation engine hands out on its own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameCursor {
    slot: usize,
    count: usize,
}

impl FrameCursor {
    pub fn new(count: usize) -> Self {
        Self {
            slot: 0,
            count,
        }
    }

    /// Moves to the next slot and returns it
    pub fn advance(&mut self) -> usize {
        if self.count > 0 {
            self.slot = (self.slot + 1) % self.count;
        }
        log::trace!("Frame slot {} of {}", self.slot, self.count);
        self.slot
    }

    pub fn reset(&mut self, count: usize) {
        self.slot = 0;
        self.count = count;
    }

    pub fn current(&self) -> usize {
        self.slot
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// One set of synchronization primitives per frame in flight
#[derive(Default)]
pub struct FrameSync {
    slots: Vec<FrameSlot>,
}

impl FrameSync {
    /// Grows or shrinks the slot set to `count`. Slots that survive keep their
    /// primitives; removed slots are destroyed.
    ///
    /// The device must be idle.
    pub fn resize<D: DeviceApi + ?Sized>(&mut self, device: &D, count: usize) -> Result<()> {
        while self.slots.len() > count {
            if let Some(mut slot) = self.slots.pop() {
                unsafe { slot.destroy(device) };
            }
        }
        while self.slots.len() < count {
            self.slots.push(FrameSlot::new(device)?);
        }
        Ok(())
    }

    /// Returns every slot to `Idle`, replacing primitives left pending by a cycle
    /// that was cut short. The device must be idle.
    pub fn recover<D: DeviceApi + ?Sized>(&mut self, device: &D) -> Result<()> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.state.mid_cycle() {
                log::debug!("Recovering frame slot {} from {:?}", index, slot.state);
            }
            slot.recover(device)?;
        }
        Ok(())
    }

    pub fn slot(&self, index: usize) -> Result<&FrameSlot> {
        self.slots.get(index).ok_or_eyre("Frame slot out of range")
    }

    pub fn slot_mut(&mut self, index: usize) -> Result<&mut FrameSlot> {
        self.slots.get_mut(index).ok_or_eyre("Frame slot out of range")
    }

    pub fn state(&self, index: usize) -> Option<FrameState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameSlot> {
        self.slots.iter()
    }

    /// # Safety
    ///
    /// The device must be idle.
    pub unsafe fn destroy<D: DeviceApi + ?Sized>(&mut self, device: &D) {
        for mut slot in self.slots.drain(..) {
            unsafe { slot.destroy(device) };
        }
    }
}
