//! Wire codec for event batches crossing the control boundary.
//!
//! Each event is a fixed 12-byte little-endian record:
//!
//! ```text
//! [kind:1][channel:1][data1:1][data2:1][trigger:8]
//! ```
//!
//! A trigger of all ones means "immediate". A batch is `count` records laid
//! end to end.

use crate::error::{RecordFault, SchedulerError};
use crate::events::{Event, EventKind, TriggerFrame};

pub const RECORD_SIZE: usize = 12;

/// Decodes exactly `count` events from `bytes`.
///
/// Records that cannot be decoded, including records missing because `bytes`
/// is shorter than `count * RECORD_SIZE`, come back as [`Event::nop`] so the
/// rest of the batch still goes through.
pub fn decode(bytes: &[u8], count: usize) -> Vec<Event> {
    let mut events = Vec::with_capacity(count.min(bytes.len() / RECORD_SIZE));
    let mut invalid = 0usize;

    for i in 0..count {
        let record = bytes.get(i * RECORD_SIZE..(i + 1) * RECORD_SIZE);
        let event = match record.map(decode_record) {
            Some(Ok(event)) => event,
            Some(Err(err)) => {
                tracing::warn!(record = i, %err, "dropping malformed event record");
                invalid += 1;
                Event::nop()
            }
            None => {
                invalid += 1;
                Event::nop()
            }
        };
        events.push(event);
    }

    if invalid > 0 {
        tracing::warn!(
            count,
            invalid,
            len = bytes.len(),
            "event batch contained records that were replaced with no-ops"
        );
    }

    events
}

/// Strictly decodes one record.
pub fn decode_record(record: &[u8]) -> Result<Event, SchedulerError> {
    let record: &[u8; RECORD_SIZE] = record
        .get(..RECORD_SIZE)
        .and_then(|r| r.try_into().ok())
        .ok_or(SchedulerError::InvalidRecord(RecordFault::Truncated))?;

    let kind = EventKind::from_tag(record[0])
        .ok_or(SchedulerError::InvalidRecord(RecordFault::UnknownKind(record[0])))?;

    let channel = record[1];
    if channel > 0x0F {
        return Err(SchedulerError::InvalidRecord(RecordFault::ChannelOutOfRange(
            channel,
        )));
    }

    for data in [record[2], record[3]] {
        if data > 0x7F {
            return Err(SchedulerError::InvalidRecord(RecordFault::DataOutOfRange(data)));
        }
    }

    let mut trigger = [0u8; 8];
    trigger.copy_from_slice(&record[4..12]);
    let trigger = TriggerFrame::from_raw(u64::from_le_bytes(trigger));

    Ok(Event::new(kind, channel, record[2], record[3], trigger))
}

pub fn encode_record(event: &Event) -> [u8; RECORD_SIZE] {
    let mut record = [0u8; RECORD_SIZE];
    record[0] = event.kind.tag();
    record[1] = event.channel;
    record[2] = event.data1;
    record[3] = event.data2;
    record[4..12].copy_from_slice(&event.trigger.to_raw().to_le_bytes());
    record
}

pub fn encode(events: &[Event]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(events.len() * RECORD_SIZE);
    for event in events {
        bytes.extend_from_slice(&encode_record(event));
    }
    bytes
}
