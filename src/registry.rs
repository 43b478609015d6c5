//! This file implements the device registry - the set of devices the bus
//! coordinator dispatches to, indexed by device id.
//!
//! The registry borrows its devices rather than owning them.  On the Pico
//! they live in statics; in tests on the stack.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

use crate::constants::{DEVICE_MASK, MAX_DEVICE_ID, MIN_DEVICE_ID, NUM_DEVICE_SLOTS};
use crate::device::IecDevice;
use crate::error::ConfigError;

/// The registered devices.
pub struct DeviceRegistry<'a> {
    slots: [Option<&'a mut dyn IecDevice>; NUM_DEVICE_SLOTS],
    enabled: u32,
}

impl Default for DeviceRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> DeviceRegistry<'a> {
    /// Create an empty registry, with every assignable id enabled.
    pub fn new() -> Self {
        Self {
            slots: [const { None }; NUM_DEVICE_SLOTS],
            enabled: DEVICE_MASK,
        }
    }

    fn slot(id: u8) -> Result<usize, ConfigError> {
        if (MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&id) {
            Ok(id as usize)
        } else {
            Err(ConfigError::InvalidDeviceId(id))
        }
    }

    /// Register `device` with id `id`, and tell the device its id.
    pub fn add_device(
        &mut self,
        device: &'a mut dyn IecDevice,
        id: u8,
    ) -> Result<(), ConfigError> {
        let slot = Self::slot(id)?;
        if self.slots[slot].is_some() {
            warn!("Device {} already registered", id);
            return Err(ConfigError::DuplicateDeviceId(id));
        }

        device.set_device_id(id);
        self.slots[slot] = Some(device);
        info!("Registered device {}", id);
        Ok(())
    }

    /// Unregister the device with id `id`, handing it back.
    pub fn remove_device(&mut self, id: u8) -> Result<&'a mut dyn IecDevice, ConfigError> {
        let slot = Self::slot(id)?;
        let device = self.slots[slot]
            .take()
            .ok_or(ConfigError::NoSuchDevice(id))?;
        info!("Removed device {}", id);
        Ok(device)
    }

    /// Get the device registered with id `id`, whether or not it is enabled.
    pub fn device_by_id(&mut self, id: u8) -> Option<&mut (dyn IecDevice + 'a)> {
        let slot = Self::slot(id).ok()?;
        self.slots[slot].as_deref_mut()
    }

    /// Get the device registered with id `id`, only if it is enabled.  This
    /// is the lookup used when dispatching commands.
    pub fn enabled_device(&mut self, id: u8) -> Option<&mut (dyn IecDevice + 'a)> {
        if self.is_enabled(id) {
            self.device_by_id(id)
        } else {
            None
        }
    }

    /// Move the device registered at `old` to `new`.
    pub fn change_device_id(&mut self, old: u8, new: u8) -> Result<(), ConfigError> {
        let old_slot = Self::slot(old)?;
        let new_slot = Self::slot(new)?;
        if self.slots[old_slot].is_none() {
            return Err(ConfigError::NoSuchDevice(old));
        }
        if old == new {
            return Ok(());
        }
        if self.slots[new_slot].is_some() {
            return Err(ConfigError::DuplicateDeviceId(new));
        }

        let device = self.slots[old_slot]
            .take()
            .ok_or(ConfigError::NoSuchDevice(old))?;
        device.set_device_id(new);
        self.slots[new_slot] = Some(device);
        info!("Device {} is now device {}", old, new);
        Ok(())
    }

    /// The number of registered devices.
    pub fn num_devices(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Whether a device is registered with id `id`.
    pub fn is_registered(&self, id: u8) -> bool {
        Self::slot(id).is_ok_and(|slot| self.slots[slot].is_some())
    }

    /// Whether id `id` is enabled.  Ids are enabled independently of
    /// whether a device is registered with them.
    pub fn is_enabled(&self, id: u8) -> bool {
        id < 32 && (self.enabled & (1 << id)) != 0
    }

    pub fn enable_device(&mut self, id: u8) -> Result<(), ConfigError> {
        Self::slot(id)?;
        self.enabled |= 1 << id;
        debug!("Enabled device {}", id);
        Ok(())
    }

    pub fn disable_device(&mut self, id: u8) -> Result<(), ConfigError> {
        Self::slot(id)?;
        self.enabled &= !(1 << id);
        debug!("Disabled device {}", id);
        Ok(())
    }

    /// The enabled ids, as a bitmask.
    pub fn enabled_mask(&self) -> u32 {
        self.enabled
    }

    /// Iterate over all registered devices, enabled or not, in id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut (dyn IecDevice + 'a)> {
        self.slots.iter_mut().filter_map(|slot| slot.as_deref_mut())
    }
}
