use crate::error::Error;
use crate::nvm::NvmTable;
use crate::platform::align_floor;
use crate::raw::{
    ERASED_BYTE, ERASED_WORD, Integrity, MIN_RECORD_SIZE, PEEK_SIZE, RECORD_MAGIC, Record,
};
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// Size of the buffer used to fill a partition with the erased pattern on devices without erase.
const ERASE_FILL_CHUNK: usize = 256;

#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PartitionStatus {
    /// The log contains garbage or no record verifies, the partition gets erased before the next
    /// write.
    Corrupt,
    Empty,
    Clean,
}

/// Where a partition stands after recovery or after the last write.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PartitionState {
    pub status: PartitionStatus,
    /// End of the last record in the log, new records are appended here.
    pub free_offset: usize,
}

impl PartitionState {
    pub(crate) const fn empty() -> Self {
        Self {
            status: PartitionStatus::Empty,
            free_offset: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum ScanOutcome {
    Empty,
    Malformed,
    /// The last record header carrying the magic before the scan limit, with the length it
    /// declares. Nothing about its content is verified yet.
    Found { offset: usize, length: usize },
}

/// Result of recovering a single partition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Recovered {
    pub(crate) state: PartitionState,
    /// The latest record that verified, set iff the partition is clean.
    pub(crate) latest: Option<(Record, Integrity)>,
}

/// One of the two partitions of a [`SettingsStorage`](crate::SettingsStorage).
#[derive(strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Side {
    A,
    B,
}

/// The record both partitions agree on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Selection {
    pub(crate) record: Record,
    pub(crate) rewrite_owed: bool,
    pub(crate) source: Option<Side>,
}

/// Walks the log of a partition from its start until the erased pattern or `limit` is reached.
pub(crate) fn scan(
    table: &mut NvmTable<'_>,
    area: usize,
    part: usize,
    limit: usize,
) -> Result<ScanOutcome, Error> {
    #[cfg(feature = "defmt")]
    trace!("scan: part {} limit {:#x}", part, limit);

    let size = table.partition(area, part)?.size;
    let mut offset = 0;
    let mut latest = None;

    while offset < limit {
        // not even a header fits, the log ends here
        if offset + PEEK_SIZE > size {
            break;
        }

        let mut buf = [0u8; PEEK_SIZE];
        table.read(area, part, offset, &mut buf)?;

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic == ERASED_WORD {
            break;
        }
        if magic != RECORD_MAGIC {
            #[cfg(feature = "debug-logs")]
            println!("internal: scan: garbage {magic:#010x} @{offset:#x}");
            return Ok(ScanOutcome::Malformed);
        }

        let length = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        // no firmware writes such a record and the walk could not make progress
        if length < MIN_RECORD_SIZE {
            #[cfg(feature = "debug-logs")]
            println!("internal: scan: impossible length {length} @{offset:#x}");
            return Ok(ScanOutcome::Malformed);
        }

        latest = Some((offset, length));
        offset += length;
    }

    Ok(match latest {
        None => ScanOutcome::Empty,
        Some((offset, length)) => ScanOutcome::Found { offset, length },
    })
}

/// Finds the latest record of a partition that passes the integrity check.
///
/// A record at the tail of the log might have been torn by a power loss. If the latest candidate
/// fails to verify, the scan is repeated with its limit narrowed to the start of that candidate,
/// until an intact record turns up or nothing is left to scan.
pub(crate) fn find_latest_valid(
    table: &mut NvmTable<'_>,
    area: usize,
    part: usize,
) -> Result<Recovered, Error> {
    #[cfg(feature = "defmt")]
    trace!("find_latest_valid: part {}", part);

    let mut end_limit = table.partition(area, part)?.size;
    let mut free_offset = None;

    while end_limit > 0 {
        let (offset, length) = match scan(table, area, part, end_limit)? {
            ScanOutcome::Empty => {
                return Ok(Recovered {
                    state: PartitionState::empty(),
                    latest: None,
                });
            }
            ScanOutcome::Malformed => {
                #[cfg(feature = "defmt")]
                warn!("find_latest_valid: part {} contains garbage", part);
                return Ok(corrupt(free_offset));
            }
            ScanOutcome::Found { offset, length } => (offset, length),
        };

        // only the very last candidate marks the end of the log
        let log_end = *free_offset.get_or_insert(offset + length);

        let (record, integrity) = match Record::read(table, area, part, offset) {
            Ok(record) => (record, record.check_integrity()),
            // a torn length field, or a record running past the end of the partition
            Err(Error::TooLarge) => {
                #[cfg(feature = "debug-logs")]
                println!("internal: find_latest_valid: length {length} @{offset:#x} does not fit");

                end_limit = offset;
                continue;
            }
            Err(e) => return Err(e),
        };

        match integrity {
            Integrity::ValidCurrent | Integrity::ValidStale => {
                #[cfg(feature = "debug-logs")]
                println!(
                    "internal: find_latest_valid: part {part} @{offset:#x} counter {} {integrity:?}",
                    record.counter
                );

                #[cfg(feature = "defmt")]
                if integrity == Integrity::ValidStale {
                    warn!("find_latest_valid: part {} holds a stale record", part);
                }

                return Ok(Recovered {
                    state: PartitionState {
                        status: PartitionStatus::Clean,
                        free_offset: log_end,
                    },
                    latest: Some((record, integrity)),
                });
            }
            Integrity::Invalid => {
                #[cfg(feature = "defmt")]
                warn!("find_latest_valid: skipping torn record @{:#x}", offset);

                #[cfg(feature = "debug-logs")]
                println!("internal: find_latest_valid: torn record @{offset:#x}");

                end_limit = offset;
            }
        }
    }

    Ok(corrupt(free_offset))
}

fn corrupt(free_offset: Option<usize>) -> Recovered {
    Recovered {
        state: PartitionState {
            status: PartitionStatus::Corrupt,
            free_offset: free_offset.unwrap_or(0),
        },
        latest: None,
    }
}

/// Reconciles the recovery results of both partitions. The newer counter wins, A wins ties.
pub(crate) fn select_authoritative(a: &Recovered, b: &Recovered) -> Selection {
    let pick = |side: Side, (record, integrity): (Record, Integrity)| Selection {
        record,
        rewrite_owed: integrity == Integrity::ValidStale,
        source: Some(side),
    };

    match (a.latest, b.latest) {
        (Some(latest_a), Some(latest_b)) => {
            if latest_a.0.counter >= latest_b.0.counter {
                pick(Side::A, latest_a)
            } else {
                pick(Side::B, latest_b)
            }
        }
        (Some(latest_a), None) => pick(Side::A, latest_a),
        (None, Some(latest_b)) => pick(Side::B, latest_b),
        (None, None) => Selection {
            record: Record::default_record(),
            rewrite_owed: true,
            source: None,
        },
    }
}

/// Appends `record` to the log of a partition. The partition gets erased first if requested or if
/// the record does not fit behind `free_offset`. Returns the new free offset.
pub(crate) fn write_record(
    table: &mut NvmTable<'_>,
    area: usize,
    part: usize,
    record: &Record,
    free_offset: usize,
    mut erase: bool,
) -> Result<usize, Error> {
    #[cfg(feature = "defmt")]
    trace!("write_record: part {} @{:#x}", part, free_offset);

    let size = table.partition(area, part)?.size;
    let raw = record.to_bytes();

    if free_offset.saturating_add(raw.len()) > size {
        erase = true;
    }

    let mut offset = free_offset;
    if erase {
        erase_partition(table, area, part, size)?;
        offset = 0;
    }

    table.write(area, part, offset, &raw)?;

    Ok(offset + raw.len())
}

/// Resets a partition to the erased pattern, by programming it on devices lacking native erase.
fn erase_partition(
    table: &mut NvmTable<'_>,
    area: usize,
    part: usize,
    size: usize,
) -> Result<(), Error> {
    #[cfg(feature = "debug-logs")]
    println!("internal: erase_partition: part {part} [{size:#x}]");

    match table.erase(area, part, 0, size) {
        Err(Error::NotSupported) => (),
        other => return other,
    }

    #[cfg(feature = "defmt")]
    warn!("erase_partition: no native erase, filling part {}", part);

    let write_size = table
        .device_info(area)?
        .write_size
        .filter(|&write_size| write_size > 0)
        .ok_or(Error::NotSupported)?;

    let fill = [ERASED_BYTE; ERASE_FILL_CHUNK];
    let chunk = align_floor(ERASE_FILL_CHUNK, write_size).max(write_size);
    if chunk > fill.len() {
        return Err(Error::NotSupported);
    }

    let mut offset = 0;
    while offset + chunk <= size {
        table.write(area, part, offset, &fill[..chunk])?;
        offset += chunk;
    }
    // misaligned remainder
    while offset < size {
        let len = write_size.min(size - offset);
        table.write(area, part, offset, &fill[..len])?;
        offset += len;
    }

    Ok(())
}
