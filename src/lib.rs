//! Power-failure resilient storage of the device settings in nonvolatile memory.
//!
//! The settings are saved across two partitions using an A/B scheme: every save appends a new
//! record to the log of one partition and the next save goes to the other one. When a partition
//! runs full it is erased. Since a write only ever touches one partition, a power loss in the
//! middle of a save leaves at least one fully committed copy in the other partition.
//!
//! Storage is reached through the [`nvm::NvmTable`] addressing layer which maps
//! `(area, partition)` pairs onto [`platform::NvmDevice`]s.
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod internal;
pub mod nvm;
pub mod platform;
mod raw;
pub mod settings;

pub use internal::{PartitionState, PartitionStatus, Side};
pub use settings::Settings;

extern crate alloc;

use crate::error::Error;
use crate::internal::{find_latest_valid, select_authoritative, write_record};
use crate::nvm::NvmTable;
use crate::raw::Record;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageStatistics {
    pub partition_a: PartitionState,
    pub partition_b: PartitionState,
    /// Generation of the cached record, incremented by every write.
    pub counter: u16,
    pub write_pending: bool,
    /// Partition the settings were recovered from, `None` if the defaults are in use.
    pub loaded_from: Option<Side>,
}

/// Keeps track of both partitions and caches the latest settings record. One instance per
/// partition pair, owned by whoever persists the settings. Calls have to be serialized by the
/// caller.
pub struct SettingsStorage {
    area: usize,
    part_a: usize,
    part_b: usize,
    state_a: PartitionState,
    state_b: PartitionState,
    latest: Record,
    loaded_from: Option<Side>,
    // set after calling self.load
    initialized: bool,
    write_needed: bool,
}

impl SettingsStorage {
    /// Creates the storage context for partitions `part_a` and `part_b` of `area`. No I/O happens
    /// before the first [`load`](Self::load) or [`save`](Self::save); until then the default
    /// settings are cached.
    pub fn new(area: usize, part_a: usize, part_b: usize) -> Self {
        Self {
            area,
            part_a,
            part_b,
            state_a: PartitionState::empty(),
            state_b: PartitionState::empty(),
            latest: Record::default_record(),
            loaded_from: None,
            initialized: false,
            write_needed: false,
        }
    }

    /// Loads the settings. The first call recovers the latest valid record of both partitions and
    /// picks the newer one, later calls return the cached settings without touching the NVM.
    ///
    /// If neither partition holds a valid record, the default settings are returned and the next
    /// [`save`](Self::save) writes them.
    pub fn load(&mut self, table: &mut NvmTable<'_>) -> Result<Settings, Error> {
        if !self.initialized {
            self.recover(table)?;
        }

        Ok(Settings::from_bytes(&self.latest.payload))
    }

    /// Saves the settings. Nothing is written if they equal the cached settings and the record
    /// on flash is up to date.
    ///
    /// A device error aborts the save and is returned as is. Whatever made it to the flash is
    /// treated as a torn record on the next load.
    pub fn save(&mut self, table: &mut NvmTable<'_>, settings: &Settings) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("save");

        if !self.initialized {
            self.recover(table)?;
        }

        let payload = settings.to_bytes();
        if payload != self.latest.payload || self.write_needed {
            self.latest.refresh(&payload);
            self.write_needed = true;
        }

        if !self.write_needed {
            return Ok(());
        }

        // alternate between the partitions so the previous generation stays untouched
        let (part, state) = if self.latest.counter % 2 == 0 {
            (self.part_a, &mut self.state_a)
        } else {
            (self.part_b, &mut self.state_b)
        };

        #[cfg(feature = "debug-logs")]
        println!(
            "lib: save: counter {} -> part {part} @{:#x} ({})",
            self.latest.counter, state.free_offset, state.status
        );

        let written = write_record(
            table,
            self.area,
            part,
            &self.latest,
            state.free_offset,
            state.status == PartitionStatus::Corrupt,
        );
        match written {
            Ok(free_offset) => {
                state.free_offset = free_offset;
                state.status = PartitionStatus::Clean;
            }
            Err(e) => {
                // the tail of the log is unknown now, start over with an erase next time
                state.status = PartitionStatus::Corrupt;
                return Err(e);
            }
        }

        match table.sync(self.area) {
            Ok(()) | Err(Error::NotSupported) => (),
            Err(e) => return Err(e),
        }

        self.write_needed = false;
        Ok(())
    }

    /// Whether the next [`save`](Self::save) writes even if the settings did not change, e.g.
    /// because the stored record is from an older firmware or no record was found at all.
    pub fn is_write_pending(&self) -> bool {
        self.write_needed
    }

    pub fn counter(&self) -> u16 {
        self.latest.counter
    }

    pub fn statistics(&self) -> StorageStatistics {
        StorageStatistics {
            partition_a: self.state_a,
            partition_b: self.state_b,
            counter: self.latest.counter,
            write_pending: self.write_needed,
            loaded_from: self.loaded_from,
        }
    }

    fn recover(&mut self, table: &mut NvmTable<'_>) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("recover");

        let recovered_a = find_latest_valid(table, self.area, self.part_a)?;
        let recovered_b = find_latest_valid(table, self.area, self.part_b)?;

        let selection = select_authoritative(&recovered_a, &recovered_b);

        #[cfg(feature = "defmt")]
        {
            match selection.source {
                Some(side) => trace!(
                    "recover: using {} counter {}",
                    side,
                    selection.record.counter
                ),
                None => warn!("recover: no valid settings found, using defaults"),
            }
        }

        #[cfg(feature = "debug-logs")]
        println!(
            "lib: recover: A {:?} B {:?} -> {:?}",
            recovered_a.state, recovered_b.state, selection.source
        );

        self.state_a = recovered_a.state;
        self.state_b = recovered_b.state;
        self.latest = selection.record;
        self.loaded_from = selection.source;
        self.write_needed = selection.rewrite_owed;
        self.initialized = true;

        Ok(())
    }
}
